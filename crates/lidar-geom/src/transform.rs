use lidar_types::{CartesianPoint, PolarPoint, SensorPose, WorldPoint, NUM_AZIMUTH_BINS};

use crate::calibration::{ELEVATION_DEG, FIRETIME_AZIMUTH_CORRECTION_DEG};

const DEG_PER_BIN: f64 = 360.0 / NUM_AZIMUTH_BINS as f64;

/// Spherical-to-sensor-Cartesian projection using the preloaded per-ring
/// elevation and firetime azimuth correction tables (§4.4). Returns `None`
/// for non-finite input or output, dropping the point rather than
/// propagating a NaN downstream.
pub fn polar_to_sensor(p: &PolarPoint) -> Option<CartesianPoint> {
    if !p.range_m.is_finite() {
        return None;
    }
    let ring = p.ring as usize;
    if ring >= ELEVATION_DEG.len() {
        return None;
    }
    let azimuth_deg =
        p.azimuth_bin as f64 * DEG_PER_BIN + FIRETIME_AZIMUTH_CORRECTION_DEG[ring];
    let azimuth_rad = azimuth_deg.to_radians();
    let elevation_rad = ELEVATION_DEG[ring].to_radians();

    let range = p.range_m as f64;
    let horizontal = range * elevation_rad.cos();
    let x = horizontal * azimuth_rad.sin();
    let y = horizontal * azimuth_rad.cos();
    let z = range * elevation_rad.sin();

    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }

    Some(CartesianPoint {
        x,
        y,
        z,
        intensity: p.intensity,
        t_ns: p.t_ns,
    })
}

/// Applies a static 4x4 homogeneous pose (rotation + translation) to compose
/// the sensor frame into the world frame. Identity pose for an
/// un-calibrated, stationary sensor.
pub fn sensor_to_world(p: &CartesianPoint, pose: &SensorPose) -> WorldPoint {
    let r = &pose.rotation;
    let t = &pose.translation;
    let x = r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + t[0];
    let y = r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + t[1];
    let z = r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + t[2];
    WorldPoint {
        x,
        y,
        z,
        intensity: p.intensity,
        t_ns: p.t_ns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lidar_types::TimestampNs;

    fn polar(ring: u8, azimuth_bin: u16, range_m: f32) -> PolarPoint {
        PolarPoint {
            ring,
            azimuth_bin,
            range_m,
            intensity: 10,
            t_ns: TimestampNs(0),
        }
    }

    #[test]
    fn nan_range_drops_point() {
        assert!(polar_to_sensor(&polar(0, 0, f32::NAN)).is_none());
    }

    #[test]
    fn identity_pose_is_a_no_op() {
        let sensor_pt = polar_to_sensor(&polar(20, 900, 10.0)).unwrap();
        let world_pt = sensor_to_world(&sensor_pt, &SensorPose::default());
        assert_relative_eq!(world_pt.x, sensor_pt.x);
        assert_relative_eq!(world_pt.y, sensor_pt.y);
        assert_relative_eq!(world_pt.z, sensor_pt.z);
    }

    #[test]
    fn horizontal_ring_has_zero_z() {
        // ring 20 has elevation 0.0 degrees.
        let pt = polar_to_sensor(&polar(20, 0, 5.0)).unwrap();
        assert_relative_eq!(pt.z, 0.0, epsilon = 1e-9);
    }
}
