use serde::Serialize;

use lidar_types::{BackgroundParams, TimestampNs};

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    seeded: bool,
    ema_range: f32,
    variance: f32,
    times_seen: u32,
}

/// Learned per-cell background range model over the sensor's native
/// `ring x azimuth_bin` polar grid (§4.6). Owned exclusively by the pipeline
/// worker; never mutated from a consumer task.
#[derive(Debug)]
pub struct BackgroundGrid {
    rings: usize,
    azimuth_bins: usize,
    cells: Vec<Cell>,
    seq: u64,
    frame_count: u32,
    warmup_start_ns: Option<TimestampNs>,
    settled: bool,
    baseline: Vec<Cell>,
    consecutive_high_fg_frames: u32,
}

impl BackgroundGrid {
    pub fn new(rings: usize, azimuth_bins: usize) -> Self {
        let cells = vec![Cell::default(); rings * azimuth_bins];
        Self {
            rings,
            azimuth_bins,
            baseline: cells.clone(),
            cells,
            seq: 0,
            frame_count: 0,
            warmup_start_ns: None,
            settled: false,
            consecutive_high_fg_frames: 0,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    fn index(&self, ring: usize, az: usize) -> usize {
        ring * self.azimuth_bins + az
    }

    /// Applies the EWMA update rule for one observed range measurement at
    /// `(ring, az)` (§4.6 update rule). `alpha` is chosen by the caller based
    /// on the grid's warmup/settled phase.
    pub fn observe(&mut self, ring: usize, az: usize, range_m: f32, params: &BackgroundParams) {
        if ring >= self.rings || az >= self.azimuth_bins {
            return;
        }
        let alpha = if self.settled {
            params.post_settle_update_fraction
        } else {
            params.background_update_fraction
        } as f32;
        let idx = self.index(ring, az);
        let cell = &mut self.cells[idx];
        if !cell.seeded && params.seed_from_first {
            cell.ema_range = range_m;
            cell.variance = 0.0;
            cell.times_seen = 1;
            cell.seeded = true;
        } else {
            let delta = range_m - cell.ema_range;
            cell.ema_range += alpha * delta;
            cell.variance += alpha * (delta * delta - cell.variance);
            cell.times_seen = cell.times_seen.saturating_add(1);
            cell.seeded = true;
        }
    }

    /// Pure threshold test against the learned model, ignoring the settled
    /// gate and neighbor confirmation (§4.6 classification threshold).
    pub fn candidate_raw(
        &self,
        ring: usize,
        az: usize,
        range_m: f32,
        params: &BackgroundParams,
    ) -> bool {
        if ring >= self.rings || az >= self.azimuth_bins {
            return false;
        }
        let cell = &self.cells[self.index(ring, az)];
        if !cell.seeded {
            return true;
        }
        let spread = cell.variance.max(0.0).sqrt();
        let closeness_threshold = params.closeness_multiplier as f32 * spread
            + params.noise_relative as f32 * range_m
            + params.safety_margin_meters as f32;
        (range_m - cell.ema_range).abs() > closeness_threshold
    }

    /// 8-connected neighbor candidate count around `(ring, az)`, wrapping the
    /// azimuth axis modulo `A` (inclusive wrap per the documented resolution
    /// of the azimuth-wrap open question) and clamping the ring axis.
    pub fn count_candidate_neighbors(&self, ring: usize, az: usize, candidates: &[bool]) -> u8 {
        debug_assert_eq!(candidates.len(), self.rings * self.azimuth_bins);
        let mut count = 0u8;
        let ring = ring as isize;
        let az = az as isize;
        let rings = self.rings as isize;
        let bins = self.azimuth_bins as isize;
        for dr in -1..=1isize {
            for da in -1..=1isize {
                if dr == 0 && da == 0 {
                    continue;
                }
                let nr = ring + dr;
                if nr < 0 || nr >= rings {
                    continue;
                }
                let na = (az + da).rem_euclid(bins);
                if candidates[(nr as usize) * self.azimuth_bins + na as usize] {
                    count += 1;
                }
            }
        }
        count
    }

    /// Advances warmup/settle state for one processed frame. Called once per
    /// frame after all points in it have been observed.
    pub fn advance_frame(&mut self, t_ns: TimestampNs, params: &BackgroundParams) {
        self.frame_count += 1;
        let warmup_start = *self.warmup_start_ns.get_or_insert(t_ns);
        if !self.settled {
            let elapsed = t_ns.as_secs_f64() - warmup_start.as_secs_f64();
            if self.frame_count >= params.warmup_min_frames
                && elapsed >= params.warmup_duration_secs
            {
                self.settled = true;
                self.baseline = self.cells.clone();
            }
        }
    }

    /// Periodic drift check (§4.6 drift detection): compares the current EMA
    /// state against the stored baseline and the recent instantaneous
    /// foreground fraction. Resets the grid and bumps `seq` if drift is
    /// detected.
    pub fn check_drift(&mut self, foreground_fraction: f64, params: &BackgroundParams) -> bool {
        if !self.settled {
            return false;
        }

        let mut drifted_cells = 0usize;
        for (cell, base) in self.cells.iter().zip(self.baseline.iter()) {
            if cell.seeded
                && base.seeded
                && (cell.ema_range - base.ema_range).abs() as f64 > params.drift_threshold_m
            {
                drifted_cells += 1;
            }
        }
        let drift_cell_fraction = drifted_cells as f64 / self.cells.len() as f64;

        if foreground_fraction > params.movement_fg_ratio {
            self.consecutive_high_fg_frames += 1;
        } else {
            self.consecutive_high_fg_frames = 0;
        }

        let moved = self.consecutive_high_fg_frames >= params.movement_window;
        let cell_drift = drift_cell_fraction > params.drift_cell_fraction;

        if moved || cell_drift {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Clears all cell state, bumps `seq`, and re-enters warmup. Consumers
    /// use `seq` to invalidate cached background snapshots.
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = Cell::default());
        self.baseline = self.cells.clone();
        self.seq += 1;
        self.frame_count = 0;
        self.warmup_start_ns = None;
        self.settled = false;
        self.consecutive_high_fg_frames = 0;
    }

    /// Snapshot export (§4.6): settled cells only, confidence capped by
    /// `times_seen_confidence_cap`.
    pub fn snapshot(&self, t_ns: TimestampNs) -> BackgroundSnapshot {
        let mut cells = Vec::new();
        for ring in 0..self.rings {
            for az in 0..self.azimuth_bins {
                let cell = &self.cells[self.index(ring, az)];
                if cell.seeded {
                    cells.push(BackgroundCell {
                        ring: ring as u8,
                        azimuth_bin: az as u16,
                        range_m: cell.ema_range,
                        times_seen: cell.times_seen,
                    });
                }
            }
        }
        BackgroundSnapshot {
            seq: self.seq,
            t_ns,
            settled: self.settled,
            non_empty_cells: cells.len(),
            cells,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BackgroundCell {
    pub ring: u8,
    pub azimuth_bin: u16,
    pub range_m: f32,
    pub times_seen: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundSnapshot {
    pub seq: u64,
    pub t_ns: TimestampNs,
    pub settled: bool,
    pub non_empty_cells: usize,
    pub cells: Vec<BackgroundCell>,
}

impl BackgroundSnapshot {
    pub fn confidence(&self, cell: &BackgroundCell, params: &BackgroundParams) -> f32 {
        (cell.times_seen.min(params.times_seen_confidence_cap)) as f32
            / params.times_seen_confidence_cap as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BackgroundParams {
        BackgroundParams::default()
    }

    #[test]
    fn first_observation_seeds_cell_without_candidate_flag() {
        let mut grid = BackgroundGrid::new(4, 8);
        let p = params();
        grid.observe(0, 0, 10.0, &p);
        // Unsettled grid always reports non-candidate via the extractor;
        // candidate_raw itself reflects the seeded model only.
        assert!(!grid.candidate_raw(0, 0, 10.0, &p));
    }

    #[test]
    fn large_deviation_is_a_candidate() {
        let mut grid = BackgroundGrid::new(4, 8);
        let p = params();
        for _ in 0..50 {
            grid.observe(0, 0, 10.0, &p);
        }
        assert!(grid.candidate_raw(0, 0, 2.0, &p));
    }

    #[test]
    fn azimuth_neighbor_wraps_around() {
        let grid = BackgroundGrid::new(4, 8);
        let mut candidates = vec![false; 4 * 8];
        // Neighbor of (0, 0) at da=-1 wraps to az=7.
        candidates[0 * 8 + 7] = true;
        let count = grid.count_candidate_neighbors(0, 0, &candidates);
        assert_eq!(count, 1);
    }

    #[test]
    fn reset_bumps_seq_and_clears_settle_state() {
        let mut grid = BackgroundGrid::new(2, 2);
        grid.settled = true;
        grid.reset();
        assert_eq!(grid.seq(), 1);
        assert!(!grid.is_settled());
    }
}
