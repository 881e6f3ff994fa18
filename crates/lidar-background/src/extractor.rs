use lidar_types::{BackgroundParams, PolarPoint};

use crate::acceptance::{AcceptanceCounters, AcceptanceSnapshot};
use crate::grid::BackgroundGrid;

/// Classifies a frame's points against the background grid and updates the
/// grid's EWMA model with the same measurements (§4.6, §4.7). Owns a
/// reusable scratch buffer shaped like the grid so no per-frame allocation
/// is needed for the neighbor-confirmation pass, plus the range-bucketed
/// accept/reject counters exposed by the admin acceptance endpoint.
pub struct ForegroundExtractor {
    rings: usize,
    azimuth_bins: usize,
    candidate_scratch: Vec<bool>,
    acceptance: AcceptanceCounters,
}

impl ForegroundExtractor {
    pub fn new(rings: usize, azimuth_bins: usize) -> Self {
        Self {
            rings,
            azimuth_bins,
            candidate_scratch: vec![false; rings * azimuth_bins],
            acceptance: AcceptanceCounters::default(),
        }
    }

    pub fn acceptance_snapshot(&self) -> AcceptanceSnapshot {
        self.acceptance.snapshot()
    }

    pub fn reset_acceptance(&mut self) {
        self.acceptance.reset();
    }

    /// Produces a foreground mask the same length as `points`, updating
    /// `grid`'s background model in the process. Before the grid has
    /// settled the mask is all-false.
    pub fn classify(
        &mut self,
        points: &[PolarPoint],
        grid: &mut BackgroundGrid,
        params: &BackgroundParams,
        mask_out: &mut Vec<bool>,
    ) {
        mask_out.clear();
        mask_out.resize(points.len(), false);
        self.candidate_scratch.iter_mut().for_each(|c| *c = false);

        for p in points {
            let ring = p.ring as usize;
            let az = p.azimuth_bin as usize;
            if ring >= self.rings || az >= self.azimuth_bins {
                continue;
            }
            let candidate = grid.candidate_raw(ring, az, p.range_m, params);
            self.candidate_scratch[ring * self.azimuth_bins + az] = candidate;
            grid.observe(ring, az, p.range_m, params);
        }

        if !grid.is_settled() {
            return;
        }

        for (i, p) in points.iter().enumerate() {
            let ring = p.ring as usize;
            let az = p.azimuth_bin as usize;
            if ring >= self.rings || az >= self.azimuth_bins {
                continue;
            }
            let idx = ring * self.azimuth_bins + az;
            if !self.candidate_scratch[idx] {
                self.acceptance.record(p.range_m, false);
                continue;
            }
            let neighbor_count = grid.count_candidate_neighbors(ring, az, &self.candidate_scratch);
            let accepted = neighbor_count as u32 >= params.neighbor_confirmation_count as u32;
            mask_out[i] = accepted;
            self.acceptance.record(p.range_m, accepted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::TimestampNs;

    fn point(ring: u8, az: u16, range_m: f32) -> PolarPoint {
        PolarPoint {
            ring,
            azimuth_bin: az,
            range_m,
            intensity: 0,
            t_ns: TimestampNs(0),
        }
    }

    #[test]
    fn unsettled_grid_yields_all_background() {
        let mut extractor = ForegroundExtractor::new(4, 8);
        let mut grid = BackgroundGrid::new(4, 8);
        let params = BackgroundParams::default();
        let points = vec![point(0, 0, 10.0)];
        let mut mask = Vec::new();
        extractor.classify(&points, &mut grid, &params, &mut mask);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn isolated_deviation_without_neighbor_support_is_suppressed() {
        let mut extractor = ForegroundExtractor::new(4, 8);
        let mut grid = BackgroundGrid::new(4, 8);
        let mut params = BackgroundParams::default();
        params.warmup_min_frames = 1;
        params.warmup_duration_secs = 0.0;

        // Settle the grid on a stable background.
        let bg_points: Vec<PolarPoint> = (0..8).map(|a| point(0, a, 10.0)).collect();
        let mut mask = Vec::new();
        for _ in 0..5 {
            extractor.classify(&bg_points, &mut grid, &params, &mut mask);
            grid.advance_frame(TimestampNs(0), &params);
        }
        assert!(grid.is_settled());

        // A single isolated point deviates but has no confirming neighbors.
        let probe = vec![point(0, 0, 2.0)];
        extractor.classify(&probe, &mut grid, &params, &mut mask);
        assert_eq!(mask, vec![false]);

        let snap = extractor.acceptance_snapshot();
        assert_eq!(snap.reject_counts.iter().sum::<u64>(), 1);
        assert_eq!(snap.accept_counts.iter().sum::<u64>(), 0);

        extractor.reset_acceptance();
        let snap = extractor.acceptance_snapshot();
        assert_eq!(snap.totals.iter().sum::<u64>(), 0);
    }
}
