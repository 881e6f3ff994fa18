//! C10: the per-sensor multi-object tracker. A constant-velocity Kalman
//! filter per track, Mahalanobis-gated nearest-neighbor assignment solved
//! optimally by the Hungarian algorithm, and a Tentative -> Confirmed ->
//! Deleted lifecycle with a post-deletion grace period before a track id is
//! forgotten for good.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use nalgebra::{Matrix2, Matrix4, Vector2, Vector4};
use pathfinding::kuhn_munkres::kuhn_munkres_min;
use pathfinding::matrix::Matrix;
use tracing::{debug, warn};

use adskalman::{CovarianceUpdateMethod, ObservationModel as _, StateAndCovariance, TransitionModelLinearNoControl};
use lidar_types::{
    Cluster, HeadingSource, Obb, ObbParams, SensorId, SpeedHistory, TimestampNs, Track, TrackId,
    TrackState, TrackerParams, WorldPoint,
};
use lidar_cluster::{estimate_obb, HeadingHints};
use tracking::motion_model_2d::ConstantVelocity2DModel;
use tracking::observation_model_2d::ObservationModel2D;

use crate::stats::PipelineStats;

/// Cost scale used to convert Mahalanobis-distance-squared (f64) into the
/// fixed-point integers `pathfinding`'s Hungarian solver requires.
const COST_SCALE: f64 = 1.0e6;
/// Cost assigned to gated-out and padding cells; large enough that the
/// solver never prefers it over a real assignment, small enough that a
/// square matrix of these sums without overflowing i64.
const SENTINEL_COST: i64 = i64::MAX / 4;

struct TrackInternal {
    track: Track,
    deleted_at_ns: Option<TimestampNs>,
}

/// Owns every live (and recently-deleted) track for one sensor. Not `Sync`;
/// the pipeline owns one instance behind its own synchronization.
pub struct Tracker {
    sensor_id: SensorId,
    tracks: Vec<TrackInternal>,
}

impl Tracker {
    pub fn new(sensor_id: SensorId) -> Self {
        Self { sensor_id, tracks: Vec::new() }
    }

    /// Runs one tracking cycle: predict every live track to `t_ns`, gate and
    /// optimally assign clusters, update matched tracks, spawn new tracks for
    /// unmatched clusters, and age out unmatched tracks. `world_points` is
    /// the frame's full foreground point cloud; clusters index into it via
    /// `member_point_refs` for heading estimation.
    pub fn step(
        &mut self,
        clusters: &[Cluster],
        world_points: &[WorldPoint],
        t_ns: TimestampNs,
        params: &TrackerParams,
        obb_params: &ObbParams,
        stats: &Arc<PipelineStats>,
    ) {
        self.predict_all(t_ns, params);

        let live_idx: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.track.state != TrackState::Deleted)
            .map(|(i, _)| i)
            .collect();

        let assignment = assign(&self.tracks, &live_idx, clusters, params);

        let mut matched_tracks = vec![false; live_idx.len()];
        let mut matched_clusters = vec![false; clusters.len()];

        for (row, col) in assignment {
            if row >= live_idx.len() || col >= clusters.len() {
                continue; // padding cell
            }
            let track_idx = live_idx[row];
            matched_tracks[row] = true;
            matched_clusters[col] = true;
            self.apply_measurement(track_idx, &clusters[col], world_points, t_ns, params, obb_params);
        }

        for (row, &track_idx) in live_idx.iter().enumerate() {
            if matched_tracks[row] {
                continue;
            }
            self.age_out(track_idx, t_ns, params);
        }

        for (col, cluster) in clusters.iter().enumerate() {
            if matched_clusters[col] {
                continue;
            }
            self.spawn(cluster, world_points, t_ns);
        }

        let confirmed = self
            .tracks
            .iter()
            .filter(|t| t.track.state == TrackState::Confirmed)
            .count();
        stats.tracks_confirmed_total.store(confirmed as u64, Ordering::Relaxed);
    }

    fn predict_all(&mut self, t_ns: TimestampNs, params: &TrackerParams) {
        for t in &mut self.tracks {
            if t.track.state == TrackState::Deleted {
                continue;
            }
            let dt = t_ns.clamped_dt_secs(t.track.last_ns, params.max_predict_dt_secs);
            let motion_model = ConstantVelocity2DModel::new(params.motion_noise_scale).calc_for_dt(dt);
            let prior = StateAndCovariance::new(
                Vector4::from_row_slice(&t.track.kalman_state),
                Matrix4::from_row_slice(&flatten4(&t.track.covariance)),
            );
            let predicted = motion_model.predict(&prior);

            let mut state = *predicted.state();
            let speed = (state[2] * state[2] + state[3] * state[3]).sqrt();
            if speed > params.v_max_mps {
                let scale = params.v_max_mps / speed;
                state[2] *= scale;
                state[3] *= scale;
            }

            let mut covariance = *predicted.covariance();
            for i in 0..4 {
                if covariance[(i, i)] > params.max_covariance_diag {
                    covariance[(i, i)] = params.max_covariance_diag;
                }
            }

            let finite = state.iter().all(|v| v.is_finite()) && covariance.iter().all(|v| v.is_finite());
            if !finite {
                warn!(track_id = %t.track.track_id, "numerical instability in predict, deleting track");
                t.track.state = TrackState::Deleted;
                t.deleted_at_ns = Some(t_ns);
                continue;
            }

            t.track.kalman_state = [state[0], state[1], state[2], state[3]];
            t.track.covariance = unflatten4(&covariance);
            t.track.last_ns = t_ns;
            t.track.speed_history.push(speed);
        }
    }

    fn apply_measurement(
        &mut self,
        track_idx: usize,
        cluster: &Cluster,
        world_points: &[WorldPoint],
        t_ns: TimestampNs,
        params: &TrackerParams,
        obb_params: &ObbParams,
    ) {
        let obs_model = measurement_model(params);
        let t = &mut self.tracks[track_idx];

        let prior = StateAndCovariance::new(
            Vector4::from_row_slice(&t.track.kalman_state),
            Matrix4::from_row_slice(&flatten4(&t.track.covariance)),
        );
        let measurement = Vector2::new(cluster.centroid[0], cluster.centroid[1]);
        let posterior = match obs_model.update(&prior, &measurement, CovarianceUpdateMethod::JosephForm) {
            Ok(p) => p,
            Err(e) => {
                warn!(track_id = %t.track.track_id, error = ?e, "kalman update failed, coasting track");
                return;
            }
        };

        let posterior_state = posterior.state();
        t.track.kalman_state = [posterior_state[0], posterior_state[1], posterior_state[2], posterior_state[3]];
        t.track.covariance = unflatten4(posterior.covariance());
        t.track.hits += 1;
        t.track.misses = 0;
        t.track.obs_count += 1;
        t.track.last_ns = t_ns;

        let members: Vec<WorldPoint> = cluster
            .member_point_refs
            .iter()
            .filter_map(|&i| world_points.get(i as usize).copied())
            .collect();
        let velocity = [t.track.kalman_state[2], t.track.kalman_state[3]];
        let hints = HeadingHints { velocity: Some(velocity), displacement: None };
        let (obb, source) = estimate_obb(&members, &t.track.obb_smoothed, t.track.heading_source, &hints, obb_params);
        t.track.obb_smoothed = obb;
        t.track.heading_smoothed = obb.heading_rad;
        t.track.heading_source = source;

        let velocity_heading = velocity[1].atan2(velocity[0]);
        let velocity_mag = (velocity[0] * velocity[0] + velocity[1] * velocity[1]).sqrt();
        if velocity_mag > obb_params.velocity_heading_min_mps {
            let diff = angular_diff_deg(velocity_heading, obb.heading_rad);
            if diff > params.misalignment_angle_deg {
                t.track.misalignment_count += 1;
            }
        }

        if t.track.state == TrackState::Tentative && t.track.hits >= params.hits_to_confirm {
            t.track.state = TrackState::Confirmed;
            debug!(track_id = %t.track.track_id, "track confirmed");
        }
    }

    fn age_out(&mut self, track_idx: usize, t_ns: TimestampNs, params: &TrackerParams) {
        let t = &mut self.tracks[track_idx];
        t.track.misses += 1;
        let max_misses = match t.track.state {
            TrackState::Tentative => params.max_misses_tentative,
            TrackState::Confirmed => params.max_misses_confirmed,
            TrackState::Deleted => return,
        };
        if t.track.misses > max_misses {
            t.track.state = TrackState::Deleted;
            t.deleted_at_ns = Some(t_ns);
            debug!(track_id = %t.track.track_id, "track deleted after exceeding miss budget");
        }
    }

    fn spawn(&mut self, cluster: &Cluster, _world_points: &[WorldPoint], t_ns: TimestampNs) {
        let track_id = TrackId::new_random();
        let measurement_var = 1.0; // refined on first update via the observation model's own R.
        let mut speed_history = SpeedHistory::new(64);
        speed_history.push(0.0);

        let track = Track {
            track_id,
            sensor_id: self.sensor_id.clone(),
            state: TrackState::Tentative,
            hits: 1,
            misses: 0,
            obs_count: 1,
            first_ns: t_ns,
            last_ns: t_ns,
            kalman_state: [cluster.centroid[0], cluster.centroid[1], 0.0, 0.0],
            covariance: [
                [measurement_var, 0.0, 0.0, 0.0],
                [0.0, measurement_var, 0.0, 0.0],
                [0.0, 0.0, 10.0, 0.0],
                [0.0, 0.0, 0.0, 10.0],
            ],
            obb_smoothed: cluster.obb,
            heading_smoothed: cluster.obb.heading_rad,
            heading_source: HeadingSource::Locked,
            class_label: "unknown".to_string(),
            class_confidence: 0.0,
            speed_history,
            misalignment_count: 0,
        };
        self.tracks.push(TrackInternal { track, deleted_at_ns: None });
    }

    /// Drops deleted tracks whose grace period has elapsed, so their ids are
    /// eventually forgotten.
    pub fn purge_expired(&mut self, now_ns: TimestampNs, grace_secs: f64) {
        self.tracks.retain(|t| match t.deleted_at_ns {
            Some(deleted_at) => now_ns.clamped_dt_secs(deleted_at, f64::MAX) < grace_secs,
            None => true,
        });
    }

    /// Deep-copy snapshot of every confirmed track, safe to hand to a
    /// consumer outside the pipeline's own lock.
    pub fn confirmed_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .filter(|t| t.track.state == TrackState::Confirmed)
            .map(|t| t.track.clone())
            .collect()
    }

    /// Deep-copy snapshot of every non-purged track, including tentative and
    /// recently-deleted ones, for diagnostics.
    pub fn all_tracks(&self) -> Vec<Track> {
        self.tracks.iter().map(|t| t.track.clone()).collect()
    }
}

fn measurement_model(params: &TrackerParams) -> ObservationModel2D<f64> {
    let var = params.measurement_noise_std_m * params.measurement_noise_std_m;
    ObservationModel2D::new(Matrix2::new(var, 0.0, 0.0, var))
}

/// Builds the track x cluster Mahalanobis cost matrix, pads it square, and
/// solves it with the Hungarian algorithm. Returns `(row, col)` pairs for
/// every accepted (non-sentinel, non-padding) assignment.
fn assign(
    tracks: &[TrackInternal],
    live_idx: &[usize],
    clusters: &[Cluster],
    params: &TrackerParams,
) -> Vec<(usize, usize)> {
    let n_tracks = live_idx.len();
    let n_clusters = clusters.len();
    if n_tracks == 0 || n_clusters == 0 {
        return Vec::new();
    }

    let obs_model = measurement_model(params);
    let n = n_tracks.max(n_clusters);

    let mut real_cost = vec![vec![false; n_clusters]; n_tracks];
    let weights = Matrix::from_fn(n, n, |(r, c)| {
        if r >= n_tracks || c >= n_clusters {
            return SENTINEL_COST;
        }
        let t = &tracks[live_idx[r]].track;
        let state = Vector4::from_row_slice(&t.kalman_state);
        let covariance = Matrix4::from_row_slice(&flatten4(&t.covariance));
        let predicted = StateAndCovariance::new(state, covariance);

        let h = obs_model.H();
        let r_mat = obs_model.R();
        let s = h * predicted.covariance() * h.transpose() + r_mat;
        let s_inv = s.try_inverse().unwrap_or_else(|| Matrix2::identity() * 1.0e-9);

        let cluster = &clusters[c];
        let measurement = Vector2::new(cluster.centroid[0], cluster.centroid[1]);
        let predicted_obs = obs_model.predict_observation(predicted.state());
        let innovation = measurement - predicted_obs;
        let maha_sq = (innovation.transpose() * s_inv * innovation)[(0, 0)];

        if maha_sq > params.gating_distance_squared || !maha_sq.is_finite() {
            SENTINEL_COST
        } else {
            real_cost[r][c] = true;
            (maha_sq * COST_SCALE).round() as i64
        }
    });

    let (_total, col_for_row) = kuhn_munkres_min(&weights);

    col_for_row
        .into_iter()
        .enumerate()
        .filter(|&(r, c)| r < n_tracks && c < n_clusters && real_cost[r][c])
        .collect()
}

fn angular_diff_deg(a_rad: f64, b_rad: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut d = (a_rad - b_rad).abs() % two_pi;
    if d > std::f64::consts::PI {
        d = two_pi - d;
    }
    d.to_degrees()
}

fn flatten4(m: &[[f64; 4]; 4]) -> [f64; 16] {
    let mut out = [0.0; 16];
    for r in 0..4 {
        for c in 0..4 {
            out[r * 4 + c] = m[r][c];
        }
    }
    out
}

fn unflatten4(m: &Matrix4<f64>) -> [[f64; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            out[r][c] = m[(r, c)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::{Aabb, ClusterId};

    fn cluster(id: u32, x: f64, y: f64) -> Cluster {
        Cluster {
            cluster_id: ClusterId(id),
            sensor_id: SensorId("s1".into()),
            t_ns: TimestampNs(0),
            centroid: [x, y, 0.0],
            aabb: Aabb { length: 0.4, width: 0.4, height: 1.7 },
            obb: Obb { cx: x, cy: y, cz: 0.0, length: 0.4, width: 0.4, height: 1.7, heading_rad: 0.0 },
            point_count: 10,
            height_p95: 1.7,
            intensity_mean: 50.0,
            member_point_refs: vec![],
        }
    }

    #[test]
    fn first_frame_spawns_tentative_tracks() {
        let mut tracker = Tracker::new(SensorId("s1".into()));
        let params = TrackerParams::default();
        let obb_params = ObbParams::default();
        let stats = Arc::new(PipelineStats::default());
        let clusters = vec![cluster(0, 1.0, 2.0)];
        tracker.step(&clusters, &[], TimestampNs(0), &params, &obb_params, &stats);
        let all = tracker.all_tracks();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, TrackState::Tentative);
    }

    #[test]
    fn repeated_hits_confirm_a_track() {
        let mut tracker = Tracker::new(SensorId("s1".into()));
        let params = TrackerParams::default();
        let obb_params = ObbParams::default();
        let stats = Arc::new(PipelineStats::default());
        for i in 0..params.hits_to_confirm {
            let t_ns = TimestampNs(i as i64 * 100_000_000);
            let clusters = vec![cluster(0, 1.0 + i as f64 * 0.05, 2.0)];
            tracker.step(&clusters, &[], t_ns, &params, &obb_params, &stats);
        }
        let confirmed = tracker.confirmed_tracks();
        assert_eq!(confirmed.len(), 1);
    }

    #[test]
    fn unmatched_tentative_track_is_deleted_after_miss_budget() {
        let mut tracker = Tracker::new(SensorId("s1".into()));
        let params = TrackerParams::default();
        let obb_params = ObbParams::default();
        let stats = Arc::new(PipelineStats::default());
        tracker.step(&[cluster(0, 1.0, 2.0)], &[], TimestampNs(0), &params, &obb_params, &stats);
        for i in 1..=params.max_misses_tentative {
            let t_ns = TimestampNs(i as i64 * 100_000_000);
            tracker.step(&[], &[], t_ns, &params, &obb_params, &stats);
        }
        let all = tracker.all_tracks();
        assert_eq!(all[0].state, TrackState::Deleted);
    }

    #[test]
    fn purge_removes_deleted_track_after_grace_period() {
        let mut tracker = Tracker::new(SensorId("s1".into()));
        let params = TrackerParams::default();
        let obb_params = ObbParams::default();
        let stats = Arc::new(PipelineStats::default());
        tracker.step(&[cluster(0, 1.0, 2.0)], &[], TimestampNs(0), &params, &obb_params, &stats);
        for i in 1..=params.max_misses_tentative {
            let t_ns = TimestampNs(i as i64 * 100_000_000);
            tracker.step(&[], &[], t_ns, &params, &obb_params, &stats);
        }
        let far_future = TimestampNs(100 * 1_000_000_000);
        tracker.purge_expired(far_future, params.deleted_track_grace_secs);
        assert!(tracker.all_tracks().is_empty());
    }
}
