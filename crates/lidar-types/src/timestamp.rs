use serde::{Deserialize, Serialize};

/// Nanosecond timestamp. For live capture this is derived from the sensor
/// packet clock; for replay it is read verbatim from the `.vrlog` index, so
/// that deterministic replay has no wall-clock dependence (§4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampNs(pub i64);

impl TimestampNs {
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 * 1e-9
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        TimestampNs((secs * 1e9).round() as i64)
    }

    /// Duration to `other`, clamped to `[0, max]` seconds. Used by the
    /// tracker's predict step (`dt = clamp(t_now - t_last, 0, MaxPredictDt)`).
    pub fn clamped_dt_secs(self, earlier: TimestampNs, max_secs: f64) -> f64 {
        let dt = (self.0 - earlier.0) as f64 * 1e-9;
        dt.clamp(0.0, max_secs)
    }
}

impl std::ops::Sub for TimestampNs {
    type Output = i64;
    fn sub(self, rhs: Self) -> i64 {
        self.0 - rhs.0
    }
}

impl std::fmt::Display for TimestampNs {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_is_clamped_to_max() {
        let t0 = TimestampNs(0);
        let t1 = TimestampNs(10_000_000_000); // 10s later
        assert_eq!(t1.clamped_dt_secs(t0, 0.5), 0.5);
    }

    #[test]
    fn dt_is_clamped_to_zero_when_negative() {
        let t0 = TimestampNs(10_000_000_000);
        let t1 = TimestampNs(0);
        assert_eq!(t1.clamped_dt_secs(t0, 0.5), 0.0);
    }
}
