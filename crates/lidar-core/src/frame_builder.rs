//! C3: accumulates decoded points into 360° rotations. A rotation boundary
//! is detected by the azimuth counter wrapping from near `NUM_AZIMUTH_BINS`
//! back to near zero, with a hysteresis band guarding against jitter right
//! at the seam re-triggering a second boundary. A frame is also force-closed
//! after `inactivity_timeout_secs` with no new points, so a stalled sensor
//! doesn't hold an in-progress frame open forever.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lidar_types::{
    Error, FrameId, PipelineParams, PolarPoint, Result, RuntimeParams, SensorId, TimestampNs,
    NUM_AZIMUTH_BINS,
};

use crate::ingest::IngestedPacket;
use crate::stats::FrameBuilderStats;

const INACTIVITY_CHECK_PERIOD: Duration = Duration::from_millis(200);

/// A completed rotation, prior to ground filtering, world transform, and
/// foreground classification; those are applied downstream once geometry and
/// background-model access are available.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub frame_id: FrameId,
    pub t_ns: TimestampNs,
    pub sensor_id: SensorId,
    pub polar_points: Vec<PolarPoint>,
}

pub struct FrameBuilder {
    sensor_id: SensorId,
    next_frame_id: FrameId,
    buf: Vec<PolarPoint>,
    last_azimuth_bin: Option<u16>,
    first_point_ns: Option<TimestampNs>,
    last_activity_ns: TimestampNs,
    stats: Arc<FrameBuilderStats>,
}

impl FrameBuilder {
    pub fn new(sensor_id: SensorId, stats: Arc<FrameBuilderStats>) -> Self {
        Self {
            sensor_id,
            next_frame_id: FrameId(0),
            buf: Vec::new(),
            last_azimuth_bin: None,
            first_point_ns: None,
            last_activity_ns: TimestampNs(0),
            stats,
        }
    }

    /// Feeds one decoded point in, returning a completed frame if this point
    /// closed a rotation boundary.
    pub fn push(&mut self, p: PolarPoint, params: &PipelineParams) -> Option<Result<RawFrame>> {
        let emitted = if self.is_wrap(p.azimuth_bin, params.azimuth_wrap_hysteresis_bins) {
            self.maybe_emit(params)
        } else {
            None
        };

        if self.buf.is_empty() {
            self.first_point_ns = Some(p.t_ns);
        }
        self.last_activity_ns = p.t_ns;
        self.last_azimuth_bin = Some(p.azimuth_bin);
        self.buf.push(p);

        emitted
    }

    /// Called periodically (independent of packet arrival) to force-close a
    /// frame that has gone quiet for longer than `inactivity_timeout_secs`.
    pub fn check_inactivity(&mut self, now_ns: TimestampNs, params: &PipelineParams) -> Option<Result<RawFrame>> {
        if self.buf.is_empty() {
            return None;
        }
        let elapsed = now_ns.clamped_dt_secs(self.last_activity_ns, f64::MAX);
        if elapsed < params.inactivity_timeout_secs {
            return None;
        }
        self.stats.inactivity_timeouts.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit(params)
    }

    fn is_wrap(&self, new_bin: u16, hysteresis_bins: u16) -> bool {
        let Some(last) = self.last_azimuth_bin else { return false };
        let near_end = last as i32 >= NUM_AZIMUTH_BINS as i32 - hysteresis_bins as i32;
        let near_start = (new_bin as i32) < hysteresis_bins as i32;
        near_end && near_start && (new_bin as i32) < (last as i32)
    }

    fn maybe_emit(&mut self, params: &PipelineParams) -> Option<Result<RawFrame>> {
        if self.buf.is_empty() {
            return None;
        }
        let n = self.buf.len();

        if n > params.hard_cap_points {
            self.stats.frames_malformed_dropped.fetch_add(1, Ordering::Relaxed);
            let err = Error::FrameMalformed(format!(
                "{n} points exceeds hard cap of {}",
                params.hard_cap_points
            ));
            self.reset();
            return Some(Err(err));
        }

        if n < params.min_frame_points {
            self.stats.frames_too_small_dropped.fetch_add(1, Ordering::Relaxed);
            self.reset();
            return None;
        }

        let frame = RawFrame {
            frame_id: self.next_frame_id,
            t_ns: self.first_point_ns.unwrap_or(self.last_activity_ns),
            sensor_id: self.sensor_id.clone(),
            polar_points: std::mem::take(&mut self.buf),
        };
        self.next_frame_id = self.next_frame_id.next();
        self.stats.frames_emitted.fetch_add(1, Ordering::Relaxed);
        self.reset();
        Some(Ok(frame))
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.first_point_ns = None;
    }
}

/// Drives a `FrameBuilder` from the ingest task's decoded-packet stream,
/// publishing each completed rotation to the pipeline worker through a
/// single-slot `watch` channel (the most recent frame always wins over a
/// stale one the worker hasn't gotten to yet). Runs until `cancel` fires or
/// the packet channel closes.
pub async fn run(
    mut builder: FrameBuilder,
    mut packets_rx: tokio::sync::mpsc::Receiver<IngestedPacket>,
    frame_tx: tokio::sync::watch::Sender<Option<RawFrame>>,
    params: Arc<RwLock<RuntimeParams>>,
    cancel: CancellationToken,
) {
    let mut inactivity_tick = tokio::time::interval(INACTIVITY_CHECK_PERIOD);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            packet = packets_rx.recv() => {
                let Some(packet) = packet else { break };
                let pipeline_params = params.read().pipeline;
                for point in packet.points {
                    if let Some(result) = builder.push(point, &pipeline_params) {
                        publish(&frame_tx, result);
                    }
                }
            }
            _ = inactivity_tick.tick() => {
                let pipeline_params = params.read().pipeline;
                let now = packet_arrival_now();
                if let Some(result) = builder.check_inactivity(now, &pipeline_params) {
                    publish(&frame_tx, result);
                }
            }
        }
    }
    debug!("frame builder task stopped");
}

fn publish(frame_tx: &tokio::sync::watch::Sender<Option<RawFrame>>, result: Result<RawFrame>) {
    match result {
        Ok(frame) => {
            let _ = frame_tx.send(Some(frame));
        }
        Err(e) => warn!(error = %e, "dropping malformed frame"),
    }
}

fn packet_arrival_now() -> TimestampNs {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    TimestampNs(d.as_nanos() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(azimuth_bin: u16, t_ns: i64) -> PolarPoint {
        PolarPoint {
            ring: 0,
            azimuth_bin,
            range_m: 5.0,
            intensity: 10,
            t_ns: TimestampNs(t_ns),
        }
    }

    fn params() -> PipelineParams {
        let mut p = PipelineParams::default();
        p.min_frame_points = 2;
        p.hard_cap_points = 10;
        p
    }

    #[test]
    fn wrap_closes_a_frame() {
        let mut fb = FrameBuilder::new(SensorId("s1".into()), Arc::new(FrameBuilderStats::default()));
        let p = params();
        assert!(fb.push(pt(1790, 0), &p).is_none());
        assert!(fb.push(pt(1795, 1), &p).is_none());
        // Wraps back near zero: closes the frame from the previous two points.
        let frame = fb.push(pt(2, 2), &p).unwrap().unwrap();
        assert_eq!(frame.polar_points.len(), 2);
    }

    #[test]
    fn jitter_near_seam_does_not_double_wrap() {
        let mut fb = FrameBuilder::new(SensorId("s1".into()), Arc::new(FrameBuilderStats::default()));
        let p = params();
        fb.push(pt(1798, 0), &p);
        fb.push(pt(1799, 1), &p);
        // Single bin of backward jitter within hysteresis: no wrap (not ascending past the gate twice).
        assert!(fb.push(pt(1797, 2), &p).is_none());
    }

    #[test]
    fn too_small_frame_is_dropped_without_emission() {
        let mut fb = FrameBuilder::new(SensorId("s1".into()), Arc::new(FrameBuilderStats::default()));
        let mut p = params();
        p.min_frame_points = 5;
        fb.push(pt(1790, 0), &p);
        let emitted = fb.push(pt(2, 1), &p);
        assert!(emitted.is_none());
    }

    #[test]
    fn hard_cap_exceeded_yields_frame_malformed() {
        let mut fb = FrameBuilder::new(SensorId("s1".into()), Arc::new(FrameBuilderStats::default()));
        let mut p = params();
        p.hard_cap_points = 2;
        p.min_frame_points = 0;
        fb.push(pt(1790, 0), &p);
        fb.push(pt(1791, 1), &p);
        fb.push(pt(1792, 2), &p);
        let emitted = fb.push(pt(2, 3), &p).unwrap();
        assert!(matches!(emitted, Err(Error::FrameMalformed(_))));
    }

    #[test]
    fn inactivity_timeout_force_closes() {
        let mut fb = FrameBuilder::new(SensorId("s1".into()), Arc::new(FrameBuilderStats::default()));
        let p = params();
        fb.push(pt(10, 0), &p);
        fb.push(pt(11, 1), &p);
        let now = TimestampNs((p.inactivity_timeout_secs * 1e9) as i64 + 2);
        let frame = fb.check_inactivity(now, &p).unwrap().unwrap();
        assert_eq!(frame.polar_points.len(), 2);
    }
}
