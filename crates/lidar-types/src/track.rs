use serde::{Deserialize, Serialize};

use crate::{HeadingSource, Obb, SensorId, TimestampNs, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

/// Ring buffer of instantaneous speeds (m/s), fixed capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedHistory {
    capacity: usize,
    buf: std::collections::VecDeque<f64>,
}

impl SpeedHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, speed_mps: f64) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(speed_mps);
    }

    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        self.buf.iter().sum::<f64>() / self.buf.len() as f64
    }

    pub fn peak(&self) -> f64 {
        self.buf.iter().cloned().fold(0.0, f64::max)
    }

    pub fn percentile(&self, p: f64) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.buf.iter().cloned().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[idx]
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Persistent multi-frame object identity (§3 Track).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: TrackId,
    pub sensor_id: SensorId,
    pub state: TrackState,
    pub hits: u32,
    pub misses: u32,
    pub obs_count: u64,
    pub first_ns: TimestampNs,
    pub last_ns: TimestampNs,
    /// `[x, y, vx, vy]`.
    pub kalman_state: [f64; 4],
    /// Row-major 4x4 covariance.
    pub covariance: [[f64; 4]; 4],
    pub obb_smoothed: Obb,
    pub heading_smoothed: f64,
    pub heading_source: HeadingSource,
    pub class_label: String,
    pub class_confidence: f32,
    pub speed_history: SpeedHistory,
    pub misalignment_count: u32,
}

impl Track {
    pub fn velocity_magnitude(&self) -> f64 {
        let [_, _, vx, vy] = self.kalman_state;
        (vx * vx + vy * vy).sqrt()
    }

    pub fn position(&self) -> [f64; 2] {
        [self.kalman_state[0], self.kalman_state[1]]
    }

    /// True iff every scalar making up this track's state is finite.
    pub fn is_finite(&self) -> bool {
        self.kalman_state.iter().all(|v| v.is_finite())
            && self.covariance.iter().flatten().all(|v| v.is_finite())
    }
}

/// Audit-trail row, written only on frames with `misses == 0` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackObservation {
    pub track_id: TrackId,
    pub t_ns: TimestampNs,
    pub pos: [f64; 3],
    pub velocity: [f64; 3],
    pub obb: Obb,
    pub heading_rad: f64,
    pub pose_ref: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_history_evicts_oldest() {
        let mut h = SpeedHistory::new(3);
        h.push(1.0);
        h.push(2.0);
        h.push(3.0);
        h.push(4.0);
        assert_eq!(h.len(), 3);
        assert_eq!(h.peak(), 4.0);
    }
}
