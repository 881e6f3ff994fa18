use serde::{Deserialize, Serialize};

use crate::TimestampNs;

/// Hesai Pandar40P geometry: 40 rings, 1800 azimuth bins per rotation.
pub const NUM_RINGS: usize = 40;
pub const NUM_AZIMUTH_BINS: usize = 1800;

/// A point as decoded off the wire: ring/azimuth indices plus range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    pub ring: u8,
    pub azimuth_bin: u16,
    pub range_m: f32,
    pub intensity: u8,
    pub t_ns: TimestampNs,
}

/// A point transformed into the sensor's own Cartesian frame: z up, x right, y forward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartesianPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u8,
    pub t_ns: TimestampNs,
}

/// A point in the world frame (sensor frame composed with `SensorPose`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u8,
    pub t_ns: TimestampNs,
}

impl CartesianPoint {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl WorldPoint {
    pub fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}
