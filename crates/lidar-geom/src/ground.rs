use lidar_types::{CartesianPoint, GroundParams};

/// Drops points outside the configured sensor-frame height band (§4.5).
/// Applied before the world transform, since the band is defined relative to
/// the sensor's own mounting height, not ground truth elevation.
pub fn in_ground_band(z: f64, params: &GroundParams) -> bool {
    z >= params.z_floor && z <= params.z_ceiling
}

/// Filters a frame's sensor-frame points down to those inside the ground
/// band, preserving input order.
pub fn filter_ground(points: &[CartesianPoint], params: &GroundParams) -> Vec<CartesianPoint> {
    points
        .iter()
        .copied()
        .filter(|p| in_ground_band(p.z, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::TimestampNs;

    fn pt(z: f64) -> CartesianPoint {
        CartesianPoint {
            x: 0.0,
            y: 0.0,
            z,
            intensity: 0,
            t_ns: TimestampNs(0),
        }
    }

    #[test]
    fn keeps_points_inside_band() {
        let params = GroundParams::default();
        let pts = vec![pt(-3.0), pt(0.0), pt(2.0)];
        let kept = filter_ground(&pts, &params);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].z, 0.0);
    }

    #[test]
    fn band_edges_are_inclusive() {
        let params = GroundParams::default();
        assert!(in_ground_band(params.z_floor, &params));
        assert!(in_ground_band(params.z_ceiling, &params));
    }
}
