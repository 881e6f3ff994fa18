use serde::{Deserialize, Serialize};

use crate::{Cluster, FrameId, SensorId, TimestampNs, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Full,
    Foreground,
    Background,
    Delta,
}

/// Point cloud decimation applied before attaching to a `FrameBundle` (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DecimationMode {
    None,
    Uniform(f32),
    ForegroundOnly,
    VoxelGrid(f32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCloudPayload {
    /// Flattened `[x, y, z, intensity]` tuples after decimation.
    pub points: Vec<[f32; 4]>,
    pub decimation: DecimationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterSet {
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackSet {
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebugOverlay {
    pub gating_ellipses: Vec<[f64; 2]>,
    pub rejected_cluster_ids: Vec<u32>,
}

/// Canonical per-frame output, the unit of streaming to consumers (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameBundle {
    pub frame_id: FrameId,
    pub t_ns: TimestampNs,
    pub sensor_id: SensorId,
    pub frame_type: FrameType,
    pub background_seq: u64,
    pub point_cloud: Option<PointCloudPayload>,
    pub cluster_set: Option<ClusterSet>,
    pub track_set: Option<TrackSet>,
    pub debug_overlay: Option<DebugOverlay>,
}
