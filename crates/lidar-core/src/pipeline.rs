//! C12: the orchestrator. Wires ingest -> frame building -> geometry ->
//! background/foreground classification -> clustering -> tracking ->
//! bundling into one worker task, exposes the runtime control surface
//! (`set_params`/`get_params`/`reset_grid`/`reset_acceptance`/`get_snapshot`/
//! `get_active_tracks`), and owns the single cancellation token that drives
//! a bounded-deadline shutdown of every task it spawned.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lidar_background::{AcceptanceSnapshot, BackgroundGrid, BackgroundSnapshot, ForegroundExtractor};
use lidar_cluster::cluster_points;
use lidar_geom::{polar_to_sensor, sensor_to_world};
use lidar_types::{
    CartesianPoint, FrameBundle, RuntimeParams, SensorId, SensorPose, TimestampNs, Track,
    NUM_AZIMUTH_BINS, NUM_RINGS,
};

use crate::bundler::{build_bundle, BundleScheduler};
use crate::frame_builder::RawFrame;
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use crate::tracker::Tracker;

/// Fire-and-forget sink for confirmed-track observations (§6); a dropped or
/// slow persistence backend must never block the tracking loop.
pub trait Persistence: Send + Sync {
    fn record_tracks(&self, tracks: &[Track], t_ns: TimestampNs);
}

/// Sink for completed frame bundles; typically an SSE fan-out in the admin
/// server. Never awaited by the pipeline worker for more than a bounded
/// offer.
pub trait Publisher: Send + Sync {
    fn publish(&self, bundle: FrameBundle);
}

struct NullPersistence;
impl Persistence for NullPersistence {
    fn record_tracks(&self, _tracks: &[Track], _t_ns: TimestampNs) {}
}

struct NullPublisher;
impl Publisher for NullPublisher {
    fn publish(&self, _bundle: FrameBundle) {}
}

/// Read side of the pipeline's state, exposed to the admin API. Cloning is
/// cheap; every clone shares the same underlying locks.
#[derive(Clone)]
pub struct PipelineHandle {
    params: Arc<RwLock<RuntimeParams>>,
    last_tracks: Arc<RwLock<Vec<Track>>>,
    last_background: Arc<RwLock<Option<BackgroundSnapshot>>>,
    last_acceptance: Arc<RwLock<AcceptanceSnapshot>>,
    stats: Arc<PipelineStats>,
    ingest_stats: Arc<crate::stats::IngestStats>,
    grid_reset_request: Arc<std::sync::atomic::AtomicBool>,
    acceptance_reset_request: Arc<std::sync::atomic::AtomicBool>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    pub fn get_params(&self) -> RuntimeParams {
        self.params.read().clone()
    }

    pub fn set_params(&self, new_params: RuntimeParams) -> lidar_types::Result<()> {
        new_params.validate()?;
        *self.params.write() = new_params;
        Ok(())
    }

    /// Requests the background grid be cleared and warmup restarted. Applied
    /// by the pipeline worker at the start of its next cycle.
    pub fn reset_grid(&self) {
        self.grid_reset_request.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Requests the range-bucketed accept/reject counters be zeroed, without
    /// touching the learned background model or any live track.
    pub fn reset_acceptance(&self) {
        self.acceptance_reset_request.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn get_active_tracks(&self) -> Vec<Track> {
        self.last_tracks.read().clone()
    }

    pub fn get_background_snapshot(&self) -> Option<BackgroundSnapshot> {
        self.last_background.read().clone()
    }

    pub fn get_acceptance_snapshot(&self) -> AcceptanceSnapshot {
        self.last_acceptance.read().clone()
    }

    pub fn stats_snapshot(&self) -> PipelineStatsSnapshot {
        use std::sync::atomic::Ordering;
        PipelineStatsSnapshot {
            packets_received: self.ingest_stats.packets_received.load(Ordering::Relaxed),
            bytes_received: self.ingest_stats.bytes_received.load(Ordering::Relaxed),
            recv_timeouts: self.ingest_stats.recv_timeouts.load(Ordering::Relaxed),
            decode_errors: self.ingest_stats.decode_errors.load(Ordering::Relaxed),
            forwarded: 0,
            dropped_queue_full: 0,
            frames_emitted: 0,
            frames_too_small_dropped: 0,
            frames_malformed_dropped: 0,
            frames_processed: self.stats.frames_processed.load(Ordering::Relaxed),
            frames_rate_limited: self.stats.frames_rate_limited.load(Ordering::Relaxed),
            inbound_drops: self.stats.inbound_drops.load(Ordering::Relaxed),
            tracks_confirmed_total: self.stats.tracks_confirmed_total.load(Ordering::Relaxed),
            background_resets: self.stats.background_resets.load(Ordering::Relaxed),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Owns the worker task and everything it needs to run; `handle()` hands out
/// the cheap, cloneable read/control surface.
pub struct PipelineOrchestrator {
    handle: PipelineHandle,
}

impl PipelineOrchestrator {
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Spawns the single pipeline worker task. `frames_rx` is a single-slot,
    /// drop-oldest handoff from the frame builder: a `watch` channel always
    /// holds only the most recently completed rotation, so a pipeline cycle
    /// that falls behind skips straight to the latest frame instead of
    /// working through a backlog. `params` is shared with the frame builder
    /// task so an admin `set_params` call takes effect on both sides of the
    /// handoff at once.
    pub fn spawn(
        sensor_id: SensorId,
        sensor_pose: SensorPose,
        params: Arc<RwLock<RuntimeParams>>,
        mut frames_rx: tokio::sync::watch::Receiver<Option<RawFrame>>,
        persistence: Option<Arc<dyn Persistence>>,
        publisher: Option<Arc<dyn Publisher>>,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let last_tracks = Arc::new(RwLock::new(Vec::new()));
        let last_background = Arc::new(RwLock::new(None));
        let last_acceptance = Arc::new(RwLock::new(
            lidar_background::AcceptanceCounters::default().snapshot(),
        ));
        let stats = Arc::new(PipelineStats::default());
        let ingest_stats = Arc::new(crate::stats::IngestStats::default());
        let grid_reset_request = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let acceptance_reset_request = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let handle = PipelineHandle {
            params: params.clone(),
            last_tracks: last_tracks.clone(),
            last_background: last_background.clone(),
            last_acceptance: last_acceptance.clone(),
            stats: stats.clone(),
            ingest_stats: ingest_stats.clone(),
            grid_reset_request: grid_reset_request.clone(),
            acceptance_reset_request: acceptance_reset_request.clone(),
            cancel: cancel.clone(),
        };

        let persistence = persistence.unwrap_or_else(|| Arc::new(NullPersistence));
        let publisher = publisher.unwrap_or_else(|| Arc::new(NullPublisher));

        let join = tokio::spawn(async move {
            let mut grid = BackgroundGrid::new(NUM_RINGS, NUM_AZIMUTH_BINS);
            let mut extractor = ForegroundExtractor::new(NUM_RINGS, NUM_AZIMUTH_BINS);
            let mut tracker = Tracker::new(sensor_id.clone());
            let mut scheduler = BundleScheduler::new();
            let mut mask = Vec::new();
            let mut last_frame_published_ns: Option<TimestampNs> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = frames_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                };
                let Some(frame) = frames_rx.borrow_and_update().clone() else { continue };

                if grid_reset_request.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    grid.reset();
                    stats.background_resets.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    info!("background grid reset by admin request");
                }
                if acceptance_reset_request.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    extractor.reset_acceptance();
                    info!("acceptance counters reset by admin request");
                }

                let snapshot_params = params.read().clone();

                // Kept index-parallel with frame.polar_points (None where the
                // spherical projection was non-finite) so the foreground mask,
                // computed over the same polar stream, stays aligned with it.
                let sensor_points: Vec<Option<CartesianPoint>> =
                    frame.polar_points.iter().map(polar_to_sensor).collect();

                extractor.classify(&frame.polar_points, &mut grid, &snapshot_params.background, &mut mask);
                grid.advance_frame(frame.t_ns, &snapshot_params.background);

                let foreground_fraction = if mask.is_empty() {
                    0.0
                } else {
                    mask.iter().filter(|m| **m).count() as f64 / mask.len() as f64
                };
                if grid.check_drift(foreground_fraction, &snapshot_params.background) {
                    stats.background_resets.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    warn!("background grid drift detected, auto-reset");
                }

                let rate_limited = match last_frame_published_ns {
                    None => false,
                    Some(last) => {
                        let min_dt = 1.0 / snapshot_params.pipeline.max_frame_rate_hz;
                        frame.t_ns.clamped_dt_secs(last, f64::MAX) < min_dt
                    }
                };

                if rate_limited {
                    stats.frames_rate_limited.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    continue;
                }
                last_frame_published_ns = Some(frame.t_ns);

                let foreground_world_points: Vec<lidar_types::WorldPoint> = sensor_points
                    .iter()
                    .zip(mask.iter())
                    .filter_map(|(maybe_pt, is_foreground)| {
                        if !*is_foreground {
                            return None;
                        }
                        let pt = (*maybe_pt)?;
                        if !lidar_geom::in_ground_band(pt.z, &snapshot_params.ground) {
                            return None;
                        }
                        Some(sensor_to_world(&pt, &sensor_pose))
                    })
                    .collect();

                let clusters = cluster_points(&foreground_world_points, &sensor_id, frame.t_ns, &snapshot_params.cluster);

                tracker.step(
                    &clusters,
                    &foreground_world_points,
                    frame.t_ns,
                    &snapshot_params.tracker,
                    &snapshot_params.obb,
                    &stats,
                );
                tracker.purge_expired(frame.t_ns, snapshot_params.tracker.deleted_track_grace_secs);

                let confirmed = tracker.confirmed_tracks();
                *last_tracks.write() = confirmed.clone();
                persistence.record_tracks(&confirmed, frame.t_ns);

                let background_snapshot = grid.snapshot(frame.t_ns);
                let background_seq = background_snapshot.seq;
                *last_background.write() = Some(background_snapshot);
                *last_acceptance.write() = extractor.acceptance_snapshot();

                let frame_type = scheduler.next_frame_type(
                    frame.t_ns,
                    background_seq,
                    snapshot_params.pipeline.background_publish_interval_secs,
                );

                let bundle = build_bundle(
                    frame.frame_id,
                    frame.t_ns,
                    sensor_id.clone(),
                    frame_type,
                    background_seq,
                    &foreground_world_points,
                    lidar_types::DecimationMode::None,
                    clusters,
                    confirmed,
                    None,
                );
                publisher.publish(bundle);

                stats.frames_processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }

            info!("pipeline worker shut down");
        });

        (Self { handle }, join)
    }
}
