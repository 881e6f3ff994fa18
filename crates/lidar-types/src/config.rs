use serde::{Deserialize, Serialize};

use crate::{Error, Result, SensorId};

/// Static 4x4 homogeneous pose composing the sensor frame into the world
/// frame. Identity for an un-calibrated static sensor (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorPose {
    /// Row-major 3x3 rotation.
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

impl Default for SensorPose {
    fn default() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }
}

/// Startup-only, immutable configuration (Design Note §9: replaces scattered
/// global mutable CLI flags). Built once from CLI flags and/or a config file,
/// then plumbed into the orchestrator. Never swapped at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub sensor_id: SensorId,
    pub udp_addr: std::net::IpAddr,
    pub udp_port: u16,
    pub rcvbuf_bytes: usize,
    pub forward: Option<std::net::SocketAddr>,
    pub forward_queue_capacity: usize,
    pub admin_addr: std::net::SocketAddr,
    pub db_path: Option<std::path::PathBuf>,
    pub log_interval_secs: u64,
    pub no_parse: bool,
    pub sensor_pose: SensorPose,
    pub replay_dir: Option<std::path::PathBuf>,
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rcvbuf_bytes == 0 {
            return Err(Error::ConfigInvalid(
                "rcvbuf_bytes must be positive".into(),
            ));
        }
        if self.log_interval_secs == 0 {
            return Err(Error::ConfigInvalid(
                "log_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Atomically-swappable tunable parameters (Design Note §9: `RuntimeParams`
/// swapped behind a single write lock via `set_params`/`get_params`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeParams {
    pub ground: GroundParams,
    pub background: BackgroundParams,
    pub cluster: ClusterParams,
    pub obb: ObbParams,
    pub tracker: TrackerParams,
    pub pipeline: PipelineParams,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            ground: GroundParams::default(),
            background: BackgroundParams::default(),
            cluster: ClusterParams::default(),
            obb: ObbParams::default(),
            tracker: TrackerParams::default(),
            pipeline: PipelineParams::default(),
        }
    }
}

impl RuntimeParams {
    pub fn validate(&self) -> Result<()> {
        if self.ground.z_floor >= self.ground.z_ceiling {
            return Err(Error::ConfigInvalid(
                "ground.z_floor must be below ground.z_ceiling".into(),
            ));
        }
        if self.background.background_update_fraction < 0.0
            || self.background.post_settle_update_fraction < 0.0
        {
            return Err(Error::ConfigInvalid(
                "background update fractions must be non-negative".into(),
            ));
        }
        if self.cluster.eps_m <= 0.0 {
            return Err(Error::ConfigInvalid("cluster.eps_m must be positive".into()));
        }
        if self.tracker.v_max_mps <= 0.0 {
            return Err(Error::ConfigInvalid(
                "tracker.v_max_mps must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundParams {
    pub z_floor: f64,
    pub z_ceiling: f64,
}

impl Default for GroundParams {
    fn default() -> Self {
        Self {
            z_floor: -2.8,
            z_ceiling: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundParams {
    pub seed_from_first: bool,
    pub background_update_fraction: f64,
    pub post_settle_update_fraction: f64,
    pub closeness_multiplier: f64,
    /// Multiplies `range_m` (see SPEC Open Question: resolved as meters-of-range, not normalized distance).
    pub noise_relative: f64,
    pub safety_margin_meters: f64,
    pub neighbor_confirmation_count: u8,
    pub warmup_min_frames: u32,
    pub warmup_duration_secs: f64,
    pub drift_threshold_m: f64,
    pub drift_cell_fraction: f64,
    pub movement_fg_ratio: f64,
    pub movement_window: u32,
    pub times_seen_confidence_cap: u32,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            seed_from_first: true,
            background_update_fraction: 0.02,
            post_settle_update_fraction: 0.0,
            closeness_multiplier: 3.0,
            noise_relative: 0.01,
            safety_margin_meters: 0.05,
            neighbor_confirmation_count: 3,
            warmup_min_frames: 100,
            warmup_duration_secs: 10.0,
            drift_threshold_m: 0.5,
            drift_cell_fraction: 0.10,
            movement_fg_ratio: 0.20,
            movement_window: 10,
            times_seen_confidence_cap: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub eps_m: f64,
    pub min_pts: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps_m: 0.7,
            min_pts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObbParams {
    pub min_points_for_heading: usize,
    pub aspect_ratio_lock: f64,
    pub heading_ema_alpha: f64,
    pub velocity_heading_min_mps: f64,
}

impl Default for ObbParams {
    fn default() -> Self {
        Self {
            min_points_for_heading: 4,
            aspect_ratio_lock: 0.25,
            heading_ema_alpha: 0.08,
            velocity_heading_min_mps: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerParams {
    pub hits_to_confirm: u32,
    pub max_misses_tentative: u32,
    pub max_misses_confirmed: u32,
    pub gating_distance_squared: f64,
    pub v_max_mps: f64,
    pub max_predict_dt_secs: f64,
    pub max_covariance_diag: f64,
    pub measurement_noise_std_m: f64,
    pub obb_dim_ema_alpha: f64,
    pub misalignment_angle_deg: f64,
    pub deleted_track_grace_secs: f64,
    pub motion_noise_scale: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            hits_to_confirm: 3,
            max_misses_tentative: 3,
            max_misses_confirmed: 15,
            gating_distance_squared: 25.0,
            v_max_mps: 30.0,
            max_predict_dt_secs: 0.5,
            max_covariance_diag: 100.0,
            measurement_noise_std_m: 0.15,
            obb_dim_ema_alpha: 0.3,
            misalignment_angle_deg: 45.0,
            deleted_track_grace_secs: 5.0,
            motion_noise_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub max_frame_rate_hz: f64,
    pub background_publish_interval_secs: f64,
    pub shutdown_deadline_secs: f64,
    pub min_frame_points: usize,
    pub hard_cap_points: usize,
    pub inactivity_timeout_secs: f64,
    pub azimuth_wrap_hysteresis_bins: u16,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            max_frame_rate_hz: 12.0,
            background_publish_interval_secs: 30.0,
            shutdown_deadline_secs: 1.0,
            min_frame_points: 200,
            hard_cap_points: 100_000,
            inactivity_timeout_secs: 1.0,
            azimuth_wrap_hysteresis_bins: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        RuntimeParams::default().validate().unwrap();
    }

    #[test]
    fn inverted_ground_band_is_invalid() {
        let mut p = RuntimeParams::default();
        p.ground.z_floor = 2.0;
        p.ground.z_ceiling = 1.0;
        assert!(p.validate().is_err());
    }
}
