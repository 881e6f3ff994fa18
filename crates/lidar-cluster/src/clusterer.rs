use lidar_types::{Aabb, Cluster, ClusterId, ClusterParams, Obb, SensorId, TimestampNs, WorldPoint};

/// Runs DBSCAN over world-frame foreground points and emits clusters in
/// deterministic `(centroid.x, centroid.y)` order (§4.8). Member points
/// below `min_pts` are discarded as noise. Clustering happens in the XY
/// plane; height is summarized separately via the AABB and `height_p95`.
pub fn cluster_points(
    points: &[WorldPoint],
    sensor_id: &SensorId,
    t_ns: TimestampNs,
    params: &ClusterParams,
) -> Vec<Cluster> {
    if points.is_empty() {
        return Vec::new();
    }

    let rows: Vec<Vec<f64>> = points.iter().map(|p| vec![p.x, p.y]).collect();
    let classifications = dbscan::cluster(params.eps_m, params.min_pts, &rows);

    let mut groups: std::collections::BTreeMap<usize, Vec<usize>> = std::collections::BTreeMap::new();
    for (idx, classification) in classifications.iter().enumerate() {
        match classification {
            dbscan::Classification::Core(id) | dbscan::Classification::Edge(id) => {
                groups.entry(*id).or_default().push(idx);
            }
            dbscan::Classification::Noise => {}
        }
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .map(|member_indices| build_cluster(points, &member_indices, sensor_id, t_ns))
        .collect();

    clusters.sort_by(|a, b| {
        (a.centroid[0], a.centroid[1])
            .partial_cmp(&(b.centroid[0], b.centroid[1]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, c) in clusters.iter_mut().enumerate() {
        c.cluster_id = ClusterId(i as u32);
    }
    clusters
}

fn build_cluster(
    points: &[WorldPoint],
    member_indices: &[usize],
    sensor_id: &SensorId,
    t_ns: TimestampNs,
) -> Cluster {
    let n = member_indices.len() as f64;
    let (mut sx, mut sy, mut sz, mut sint) = (0.0, 0.0, 0.0, 0.0);
    let (mut min_x, mut min_y, mut min_z) = (f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y, mut max_z) = (f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut zs: Vec<f64> = Vec::with_capacity(member_indices.len());

    for &idx in member_indices {
        let p = &points[idx];
        sx += p.x;
        sy += p.y;
        sz += p.z;
        sint += p.intensity as f64;
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        min_z = min_z.min(p.z);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
        max_z = max_z.max(p.z);
        zs.push(p.z);
    }

    zs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p95_idx = (((zs.len() - 1) as f64) * 0.95).round() as usize;
    let height_p95 = zs[p95_idx] - min_z;

    let centroid = [sx / n, sy / n, sz / n];

    Cluster {
        cluster_id: ClusterId(0),
        sensor_id: sensor_id.clone(),
        t_ns,
        centroid,
        aabb: Aabb {
            length: max_x - min_x,
            width: max_y - min_y,
            height: max_z - min_z,
        },
        obb: Obb {
            cx: centroid[0],
            cy: centroid[1],
            cz: centroid[2],
            length: max_x - min_x,
            width: max_y - min_y,
            height: max_z - min_z,
            heading_rad: 0.0,
        },
        point_count: member_indices.len() as u32,
        height_p95,
        intensity_mean: sint / n,
        member_point_refs: member_indices.iter().map(|&i| i as u32).collect(),
    }
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
            intensity: 50,
            t_ns: TimestampNs(0),
        }
    }

    #[test]
    fn tight_group_forms_one_cluster() {
        let sensor = SensorId("s1".into());
        let pts = vec![
            pt(0.0, 0.0, 0.0),
            pt(0.1, 0.0, 0.2),
            pt(0.0, 0.1, 0.4),
            pt(0.1, 0.1, 1.7),
            pt(0.05, 0.05, 1.0),
        ];
        let params = ClusterParams { eps_m: 0.7, min_pts: 3 };
        let clusters = cluster_points(&pts, &sensor, TimestampNs(0), &params);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_count, 5);
    }

    #[test]
    fn sparse_points_below_min_pts_are_noise() {
        let sensor = SensorId("s1".into());
        let pts = vec![pt(0.0, 0.0, 0.0), pt(50.0, 50.0, 0.0)];
        let params = ClusterParams { eps_m: 0.7, min_pts: 5 };
        let clusters = cluster_points(&pts, &sensor, TimestampNs(0), &params);
        assert!(clusters.is_empty());
    }

    #[test]
    fn two_well_separated_groups_yield_two_clusters_sorted_by_centroid() {
        let sensor = SensorId("s1".into());
        let mut pts = Vec::new();
        for i in 0..5 {
            pts.push(pt(10.0 + i as f64 * 0.05, 0.0, 0.0));
        }
        for i in 0..5 {
            pts.push(pt(-10.0 + i as f64 * 0.05, 0.0, 0.0));
        }
        let params = ClusterParams { eps_m: 0.5, min_pts: 3 };
        let clusters = cluster_points(&pts, &sensor, TimestampNs(0), &params);
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].centroid[0] < clusters[1].centroid[0]);
        assert_eq!(clusters[0].cluster_id, ClusterId(0));
        assert_eq!(clusters[1].cluster_id, ClusterId(1));
    }
}
