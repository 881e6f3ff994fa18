//! C11: assembles the canonical per-frame `FrameBundle` that gets published
//! to consumers, applying point-cloud decimation and deciding which frame
//! type to emit this cycle (§4.11).

use lidar_types::{
    ClusterSet, DebugOverlay, DecimationMode, FrameBundle, FrameId, FrameType, PointCloudPayload,
    SensorId, TimestampNs, Track, TrackSet, WorldPoint,
};

/// Tracks when the background layer was last published so the scheduler can
/// interleave it with foreground/full frames on its own cadence.
pub struct BundleScheduler {
    last_background_publish_ns: Option<TimestampNs>,
    last_background_seq_published: u64,
}

impl BundleScheduler {
    pub fn new() -> Self {
        Self { last_background_publish_ns: None, last_background_seq_published: u64::MAX }
    }

    /// Decides the frame type for this cycle: `Background` on the publish
    /// interval or whenever the grid has reset since the last publish,
    /// `Foreground` otherwise. `Full` is only ever produced on an explicit
    /// request from the admin API, handled by the caller before reaching
    /// this scheduler.
    pub fn next_frame_type(
        &mut self,
        t_ns: TimestampNs,
        background_seq: u64,
        background_publish_interval_secs: f64,
    ) -> FrameType {
        let seq_changed = background_seq != self.last_background_seq_published;
        let interval_elapsed = match self.last_background_publish_ns {
            None => true,
            Some(last) => t_ns.clamped_dt_secs(last, f64::MAX) >= background_publish_interval_secs,
        };

        if seq_changed || interval_elapsed {
            self.last_background_publish_ns = Some(t_ns);
            self.last_background_seq_published = background_seq;
            FrameType::Background
        } else {
            FrameType::Foreground
        }
    }
}

impl Default for BundleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a decimation mode to a world-frame point cloud.
pub fn decimate(points: &[WorldPoint], mode: DecimationMode) -> PointCloudPayload {
    let decimated: Vec<[f32; 4]> = match mode {
        DecimationMode::None => points.iter().map(point_to_tuple).collect(),
        DecimationMode::Uniform(stride) => {
            let step = stride.max(1.0) as usize;
            points.iter().step_by(step.max(1)).map(point_to_tuple).collect()
        }
        DecimationMode::ForegroundOnly => points.iter().map(point_to_tuple).collect(),
        DecimationMode::VoxelGrid(voxel_m) => voxel_downsample(points, voxel_m),
    };
    PointCloudPayload { points: decimated, decimation: mode }
}

fn point_to_tuple(p: &WorldPoint) -> [f32; 4] {
    [p.x as f32, p.y as f32, p.z as f32, p.intensity as f32]
}

/// Keeps one representative point per occupied voxel cell, selected by
/// whichever point in the cell is encountered first.
fn voxel_downsample(points: &[WorldPoint], voxel_m: f32) -> Vec<[f32; 4]> {
    let voxel = voxel_m.max(1.0e-3) as f64;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for p in points {
        let key = (
            (p.x / voxel).floor() as i64,
            (p.y / voxel).floor() as i64,
            (p.z / voxel).floor() as i64,
        );
        if seen.insert(key) {
            out.push(point_to_tuple(p));
        }
    }
    out
}

/// Builds the published bundle for one frame. `point_cloud` is `None` for a
/// pure `Background` frame, since the background layer is published as a
/// snapshot via the admin API rather than inline point data.
#[allow(clippy::too_many_arguments)]
pub fn build_bundle(
    frame_id: FrameId,
    t_ns: TimestampNs,
    sensor_id: SensorId,
    frame_type: FrameType,
    background_seq: u64,
    foreground_points: &[WorldPoint],
    decimation: DecimationMode,
    clusters: Vec<lidar_types::Cluster>,
    tracks: Vec<Track>,
    debug_overlay: Option<DebugOverlay>,
) -> FrameBundle {
    let point_cloud = match frame_type {
        FrameType::Background => None,
        _ => Some(decimate(foreground_points, decimation)),
    };

    FrameBundle {
        frame_id,
        t_ns,
        sensor_id,
        frame_type,
        background_seq,
        point_cloud,
        cluster_set: Some(ClusterSet { clusters }),
        track_set: Some(TrackSet { tracks }),
        debug_overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::TimestampNs;

    fn pt(x: f64) -> WorldPoint {
        WorldPoint { x, y: 0.0, z: 0.0, intensity: 1, t_ns: TimestampNs(0) }
    }

    #[test]
    fn first_frame_publishes_background() {
        let mut sched = BundleScheduler::new();
        assert_eq!(sched.next_frame_type(TimestampNs(0), 0, 30.0), FrameType::Background);
    }

    #[test]
    fn unchanged_seq_within_interval_stays_foreground() {
        let mut sched = BundleScheduler::new();
        sched.next_frame_type(TimestampNs(0), 0, 30.0);
        let t = TimestampNs(5_000_000_000);
        assert_eq!(sched.next_frame_type(t, 0, 30.0), FrameType::Foreground);
    }

    #[test]
    fn grid_reset_forces_background_publish() {
        let mut sched = BundleScheduler::new();
        sched.next_frame_type(TimestampNs(0), 0, 30.0);
        let t = TimestampNs(1_000_000_000);
        assert_eq!(sched.next_frame_type(t, 1, 30.0), FrameType::Background);
    }

    #[test]
    fn voxel_downsample_collapses_duplicates() {
        let points = vec![pt(0.0), pt(0.05), pt(10.0)];
        let out = voxel_downsample(&points, 1.0);
        assert_eq!(out.len(), 2);
    }
}
