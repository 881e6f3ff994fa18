use serde::{Deserialize, Serialize};

use crate::{ClusterId, SensorId, TimestampNs};

/// Axis-aligned bounding box (min/max per world axis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

/// Oriented bounding box, 5-DoF (zero pitch/roll per this spec's non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obb {
    pub cx: f64,
    pub cy: f64,
    pub cz: f64,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    /// Radians, normalized to `[-pi, pi]`.
    pub heading_rad: f64,
}

impl Obb {
    pub fn aspect_ambiguous(&self, aspect_ratio_lock: f64) -> bool {
        let longest = self.length.max(self.width);
        if longest <= 0.0 {
            return true;
        }
        (self.length - self.width).abs() / longest < aspect_ratio_lock
    }
}

/// Diagnostic record of which evidence source produced a heading update (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingSource {
    Pca,
    Velocity,
    Displacement,
    Locked,
}

/// A frame-local cluster of foreground points (§3 Cluster).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: ClusterId,
    pub sensor_id: SensorId,
    pub t_ns: TimestampNs,
    pub centroid: [f64; 3],
    pub aabb: Aabb,
    pub obb: Obb,
    pub point_count: u32,
    pub height_p95: f64,
    pub intensity_mean: f64,
    /// Indices into the owning frame's `cartesian_points`/`foreground_mask`.
    pub member_point_refs: Vec<u32>,
}
