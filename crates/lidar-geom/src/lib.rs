//! Pure, stateless geometry: spherical-to-Cartesian projection, static pose
//! composition into the world frame, and sensor-frame ground-band filtering
//! (§4.4, §4.5).

mod calibration;
mod ground;
mod transform;

pub use calibration::{ELEVATION_DEG, FIRETIME_AZIMUTH_CORRECTION_DEG};
pub use ground::{filter_ground, in_ground_band};
pub use transform::{polar_to_sensor, sensor_to_world};
