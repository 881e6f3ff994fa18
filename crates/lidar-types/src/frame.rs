use serde::{Deserialize, Serialize};

use crate::{CartesianPoint, FrameId, PolarPoint, SensorId, TimestampNs};

/// One 360° rotation's worth of points (§3 Frame).
///
/// Invariant: `polar_points.len() == cartesian_points.len() ==
/// foreground_mask.len()`. `t_ns` is the timestamp of the first point and is
/// strictly non-decreasing across frames from the same sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub t_ns: TimestampNs,
    pub sensor_id: SensorId,
    pub polar_points: Vec<PolarPoint>,
    pub cartesian_points: Vec<CartesianPoint>,
    pub foreground_mask: Vec<bool>,
}

impl Frame {
    pub fn empty(frame_id: FrameId, t_ns: TimestampNs, sensor_id: SensorId) -> Self {
        Self {
            frame_id,
            t_ns,
            sensor_id,
            polar_points: Vec::new(),
            cartesian_points: Vec::new(),
            foreground_mask: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.polar_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polar_points.is_empty()
    }

    /// Debug-only invariant check; call from tests and from the bundler
    /// under `debug_assert!` at frame-construction boundaries.
    pub fn check_invariants(&self) -> bool {
        self.polar_points.len() == self.cartesian_points.len()
            && self.polar_points.len() == self.foreground_mask.len()
    }
}
