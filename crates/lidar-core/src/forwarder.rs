//! C2: best-effort raw packet forwarding to a secondary consumer (e.g. a
//! recorder or a second pipeline instance). Forwarding never blocks or slows
//! ingest: packets are deep-copied into a bounded queue and a dedicated task
//! drains it; a full queue drops the newest packet and bumps a counter
//! rather than applying backpressure to the ingest loop.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stats::ForwardStats;

const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Cheap, cloneable front-end used by the ingest task to hand off a packet
/// without awaiting the forwarder task.
#[derive(Clone)]
pub struct ForwardHandle {
    tx: Option<mpsc::Sender<Bytes>>,
    stats: Arc<ForwardStats>,
}

impl ForwardHandle {
    /// A handle with forwarding disabled; `offer` is then a no-op.
    pub fn disabled(stats: Arc<ForwardStats>) -> Self {
        Self { tx: None, stats }
    }

    pub fn enabled(tx: mpsc::Sender<Bytes>, stats: Arc<ForwardStats>) -> Self {
        Self { tx: Some(tx), stats }
    }

    /// Deep-copies `payload` and attempts a non-blocking enqueue. Drops and
    /// counts on a full queue; never awaits.
    pub fn offer(&self, payload: &[u8]) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(Bytes::copy_from_slice(payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.stats.record_dropped(),
            Err(mpsc::error::TrySendError::Closed(_)) => self.stats.record_dropped(),
        }
    }
}

/// Drains the forwarding queue to `dest` over UDP until `cancel` fires or the
/// channel closes. Socket send errors are aggregated and logged at most once
/// per `ERROR_LOG_INTERVAL` rather than per packet.
pub async fn run(
    socket: UdpSocket,
    dest: SocketAddr,
    mut rx: mpsc::Receiver<Bytes>,
    stats: Arc<ForwardStats>,
    cancel: CancellationToken,
) {
    let mut last_error_log = Instant::now() - ERROR_LOG_INTERVAL;
    let mut errors_since_log = 0u64;

    loop {
        let packet = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            packet = rx.recv() => packet,
        };
        let Some(packet) = packet else { break };

        match socket.send_to(&packet, dest).await {
            Ok(_) => stats.record_forwarded(),
            Err(e) => {
                stats.record_send_error();
                errors_since_log += 1;
                if last_error_log.elapsed() >= ERROR_LOG_INTERVAL {
                    warn!(%dest, error = %e, count = errors_since_log, "forward send errors in last interval");
                    errors_since_log = 0;
                    last_error_log = Instant::now();
                }
            }
        }
    }
    debug!("forwarder task stopped, total={}", stats.forwarded.load(Ordering::Relaxed));
}
