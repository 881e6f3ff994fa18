//! C1: UDP packet ingest. Binds a single socket, reads packets into a reused
//! buffer, and fans each packet out to the forwarder and to the frame
//! builder. A short read deadline keeps shutdown responsive even when no
//! packets are arriving; read timeouts are expected steady-state behavior,
//! not errors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lidar_types::{Error, PolarPoint, Result, TimestampNs};

use crate::decoder::PacketDecoder;
use crate::forwarder::ForwardHandle;
use crate::stats::IngestStats;

const RECV_BUF_LEN: usize = 1500;
const READ_DEADLINE: Duration = Duration::from_secs(1);

/// Binds the ingest socket via `socket2` so the receive buffer size can be
/// set before the socket is handed to tokio; failure to apply the requested
/// size is logged, not fatal.
pub async fn bind(addr: SocketAddr, rcvbuf_bytes: usize) -> Result<UdpSocket> {
    let domain = if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
    let sock2 = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
        .map_err(|source| Error::SocketBindError { addr, source })?;
    sock2
        .set_nonblocking(true)
        .map_err(|source| Error::SocketBindError { addr, source })?;
    if let Err(e) = sock2.set_recv_buffer_size(rcvbuf_bytes) {
        warn!(%addr, error = %e, "failed to set socket receive buffer size, continuing with OS default");
    }
    sock2
        .bind(&addr.into())
        .map_err(|source| Error::SocketBindError { addr, source })?;
    UdpSocket::from_std(sock2.into())
        .map_err(|source| Error::SocketBindError { addr, source })
}

/// Emitted per packet that decoded to at least zero points. `raw` is the
/// packet's bytes, deep-copied once here so both the forwarder and the
/// decoder can own their own copy without contending on the ingest buffer.
pub struct IngestedPacket {
    pub points: Vec<PolarPoint>,
    pub arrival_ns: TimestampNs,
}

/// Runs until `cancel` fires. Every successfully decoded packet's points are
/// sent on `points_tx`; a full channel here is a bug elsewhere in the
/// pipeline; back-off by awaiting the send rather than dropping, since frame
/// integrity depends on not silently losing the packet's points.
pub async fn run(
    socket: UdpSocket,
    mut decoder: Box<dyn PacketDecoder>,
    forward: ForwardHandle,
    points_tx: tokio::sync::mpsc::Sender<IngestedPacket>,
    stats: Arc<IngestStats>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; RECV_BUF_LEN];

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let recv = tokio::time::timeout(READ_DEADLINE, socket.recv_from(&mut buf)).await;
        let (n, _peer) = match recv {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(error = %e, "ingest socket read error");
                continue;
            }
            Err(_elapsed) => {
                stats.record_timeout();
                continue;
            }
        };

        let arrival_ns = now_ns();
        stats.record_packet(n);

        let payload = &buf[..n];
        forward.offer(payload);

        match decoder.decode(payload, arrival_ns) {
            Ok(points) => {
                if points_tx.send(IngestedPacket { points, arrival_ns }).await.is_err() {
                    debug!("frame builder channel closed, stopping ingest");
                    break;
                }
            }
            Err(e) => {
                stats.record_decode_error();
                debug!(error = %e, "dropping malformed packet");
            }
        }
    }
}

fn now_ns() -> TimestampNs {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    TimestampNs(d.as_nanos() as i64)
}
