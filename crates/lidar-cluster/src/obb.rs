use lidar_types::{HeadingSource, Obb, ObbParams, WorldPoint};
use nalgebra::{Matrix2, SymmetricEigen};

/// Inputs available to disambiguate a PCA heading (§4.9 step 4), in
/// descending priority order.
pub struct HeadingHints {
    pub velocity: Option<[f64; 2]>,
    pub displacement: Option<[f64; 2]>,
}

/// Estimates an oriented bounding box from cluster member points and the
/// prior smoothed box, following the PCA-then-disambiguate-then-EMA pipeline
/// of §4.9. `min_points_for_heading`/`aspect_ratio_lock` gate whether the
/// heading update is applied at all this frame.
pub fn estimate_obb(
    member_points: &[WorldPoint],
    prior: &Obb,
    prior_heading_source: HeadingSource,
    hints: &HeadingHints,
    params: &ObbParams,
) -> (Obb, HeadingSource) {
    let n = member_points.len();
    if n == 0 {
        return (*prior, HeadingSource::Locked);
    }

    let (cx, cy, cz) = centroid(member_points);

    let mut length = prior.length;
    let mut width = prior.width;
    let height = z_extent(member_points);

    let too_sparse = n < params.min_points_for_heading;
    let pca_heading = if too_sparse {
        None
    } else {
        Some(principal_heading(member_points, cx, cy))
    };

    let aspect_ambiguous = pca_heading
        .map(|_| {
            let (l, w) = box_extent(member_points, cx, cy, pca_heading.unwrap());
            (l - w).abs() / l.max(w).max(1e-9) < params.aspect_ratio_lock
        })
        .unwrap_or(true);

    let (heading_new, source) = if too_sparse || aspect_ambiguous {
        (prior.heading_rad, HeadingSource::Locked)
    } else if let Some(v) = hints
        .velocity
        .filter(|v| (v[0] * v[0] + v[1] * v[1]).sqrt() > params.velocity_heading_min_mps)
    {
        (v[1].atan2(v[0]), HeadingSource::Velocity)
    } else if let Some(d) = hints.displacement.filter(|d| d[0] != 0.0 || d[1] != 0.0) {
        (d[1].atan2(d[0]), HeadingSource::Displacement)
    } else if let Some(pca) = pca_heading {
        (disambiguate_against_prior(pca, prior.heading_rad), HeadingSource::Pca)
    } else {
        (prior.heading_rad, HeadingSource::Locked)
    };

    let heading_smoothed = if source == HeadingSource::Locked {
        prior.heading_rad
    } else {
        circular_blend(prior.heading_rad, heading_new, params.heading_ema_alpha)
    };

    if !too_sparse && !aspect_ambiguous {
        let (l, w) = box_extent(member_points, cx, cy, heading_smoothed);
        length = l;
        width = w;
    }

    let obb = Obb {
        cx,
        cy,
        cz,
        length,
        width,
        height,
        heading_rad: heading_smoothed,
    };

    let _ = prior_heading_source;
    (obb, source)
}

fn centroid(points: &[WorldPoint]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let (mut sx, mut sy, mut sz) = (0.0, 0.0, 0.0);
    for p in points {
        sx += p.x;
        sy += p.y;
        sz += p.z;
    }
    (sx / n, sy / n, sz / n)
}

fn z_extent(points: &[WorldPoint]) -> f64 {
    let mut min_z = f64::INFINITY;
    let mut max_z = f64::NEG_INFINITY;
    for p in points {
        min_z = min_z.min(p.z);
        max_z = max_z.max(p.z);
    }
    max_z - min_z
}

/// Principal axis of the XY covariance, `atan2(eigvec0.y, eigvec0.x)`,
/// ambiguous modulo pi (§4.9 steps 2-3).
fn principal_heading(points: &[WorldPoint], cx: f64, cy: f64) -> f64 {
    let n = points.len() as f64;
    let (mut cxx, mut cxy, mut cyy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        cxx += dx * dx;
        cxy += dx * dy;
        cyy += dy * dy;
    }
    cxx /= n;
    cxy /= n;
    cyy /= n;

    let cov = Matrix2::new(cxx, cxy, cxy, cyy);
    let eigen = SymmetricEigen::new(cov);
    // Principal axis is the eigenvector with the larger eigenvalue.
    let major = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        eigen.eigenvectors.column(0)
    } else {
        eigen.eigenvectors.column(1)
    };
    major[1].atan2(major[0])
}

/// Picks the representative in `[-pi, pi]` of the pi-ambiguous PCA heading
/// closest to the prior smoothed heading, so the EMA never takes the long
/// way around.
fn disambiguate_against_prior(pca_heading: f64, prior: f64) -> f64 {
    let a = normalize(pca_heading);
    let b = normalize(pca_heading + std::f64::consts::PI);
    if angular_distance(a, prior) <= angular_distance(b, prior) {
        a
    } else {
        b
    }
}

fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % (2.0 * std::f64::consts::PI);
    d.min(2.0 * std::f64::consts::PI - d)
}

fn normalize(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut a = angle % two_pi;
    if a > std::f64::consts::PI {
        a -= two_pi;
    } else if a < -std::f64::consts::PI {
        a += two_pi;
    }
    a
}

/// Rotates member points into the box-aligned frame about `(cx,cy)` and
/// returns `(length, width)` extents along/perpendicular to `heading`.
fn box_extent(points: &[WorldPoint], cx: f64, cy: f64, heading: f64) -> (f64, f64) {
    let (s, c) = heading.sin_cos();
    let mut min_l = f64::INFINITY;
    let mut max_l = f64::NEG_INFINITY;
    let mut min_w = f64::INFINITY;
    let mut max_w = f64::NEG_INFINITY;
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        let l = dx * c + dy * s;
        let w = -dx * s + dy * c;
        min_l = min_l.min(l);
        max_l = max_l.max(l);
        min_w = min_w.min(w);
        max_w = max_w.max(w);
    }
    (max_l - min_l, max_w - min_w)
}

/// Blends two angles on the unit circle, avoiding the discontinuity at +-pi.
pub fn circular_blend(prev: f64, new: f64, alpha: f64) -> f64 {
    let x = (1.0 - alpha) * prev.cos() + alpha * new.cos();
    let y = (1.0 - alpha) * prev.sin() + alpha * new.sin();
    y.atan2(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::TimestampNs;

    fn pt(x: f64, y: f64, z: f64) -> WorldPoint {
        WorldPoint {
            x,
            y,
            z,
            intensity: 0,
            t_ns: TimestampNs(0),
        }
    }

    fn default_prior() -> Obb {
        Obb {
            cx: 0.0,
            cy: 0.0,
            cz: 0.0,
            length: 0.4,
            width: 0.4,
            height: 1.7,
            heading_rad: 0.0,
        }
    }

    #[test]
    fn sparse_cluster_locks_heading() {
        let params = ObbParams::default();
        let points = vec![pt(0.0, 0.0, 0.0), pt(0.1, 0.0, 1.0)];
        let (obb, source) = estimate_obb(
            &points,
            &default_prior(),
            HeadingSource::Locked,
            &HeadingHints { velocity: None, displacement: None },
            &params,
        );
        assert_eq!(source, HeadingSource::Locked);
        assert_eq!(obb.heading_rad, 0.0);
    }

    #[test]
    fn velocity_hint_wins_over_pca_when_fast_enough() {
        let params = ObbParams::default();
        let points: Vec<WorldPoint> = (0..10)
            .map(|i| pt(i as f64 * 0.1, 0.0, (i % 2) as f64))
            .collect();
        let hints = HeadingHints {
            velocity: Some([0.0, 5.0]),
            displacement: None,
        };
        let (_, source) = estimate_obb(&points, &default_prior(), HeadingSource::Locked, &hints, &params);
        assert_eq!(source, HeadingSource::Velocity);
    }

    #[test]
    fn circular_blend_handles_wraparound() {
        let blended = circular_blend(std::f64::consts::PI - 0.1, -std::f64::consts::PI + 0.1, 0.5);
        assert!(blended.abs() > std::f64::consts::PI - 0.2 || blended.abs() < 0.2);
    }
}
