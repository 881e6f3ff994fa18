use serde::Serialize;

/// Range buckets for the acceptance-rate admin endpoint: ten 10m-wide bins
/// out to 100m, plus an overflow bucket for everything beyond.
pub const NUM_ACCEPTANCE_BUCKETS: usize = 11;
pub const ACCEPTANCE_BUCKET_WIDTH_M: f32 = 10.0;

fn bucket_index(range_m: f32) -> usize {
    if range_m.is_finite() && range_m >= 0.0 {
        ((range_m / ACCEPTANCE_BUCKET_WIDTH_M) as usize).min(NUM_ACCEPTANCE_BUCKETS - 1)
    } else {
        NUM_ACCEPTANCE_BUCKETS - 1
    }
}

/// Running per-range-bucket accept/reject counts, owned by the foreground
/// extractor and read out as an `AcceptanceSnapshot` by the admin API.
#[derive(Debug, Clone)]
pub struct AcceptanceCounters {
    accept: [u64; NUM_ACCEPTANCE_BUCKETS],
    reject: [u64; NUM_ACCEPTANCE_BUCKETS],
}

impl Default for AcceptanceCounters {
    fn default() -> Self {
        Self {
            accept: [0; NUM_ACCEPTANCE_BUCKETS],
            reject: [0; NUM_ACCEPTANCE_BUCKETS],
        }
    }
}

impl AcceptanceCounters {
    pub fn record(&mut self, range_m: f32, accepted: bool) {
        let idx = bucket_index(range_m);
        if accepted {
            self.accept[idx] += 1;
        } else {
            self.reject[idx] += 1;
        }
    }

    pub fn reset(&mut self) {
        self.accept = [0; NUM_ACCEPTANCE_BUCKETS];
        self.reject = [0; NUM_ACCEPTANCE_BUCKETS];
    }

    pub fn snapshot(&self) -> AcceptanceSnapshot {
        let mut buckets_meters = Vec::with_capacity(NUM_ACCEPTANCE_BUCKETS);
        let mut accept_counts = Vec::with_capacity(NUM_ACCEPTANCE_BUCKETS);
        let mut reject_counts = Vec::with_capacity(NUM_ACCEPTANCE_BUCKETS);
        let mut totals = Vec::with_capacity(NUM_ACCEPTANCE_BUCKETS);
        let mut acceptance_rates = Vec::with_capacity(NUM_ACCEPTANCE_BUCKETS);

        for i in 0..NUM_ACCEPTANCE_BUCKETS {
            let a = self.accept[i];
            let r = self.reject[i];
            let total = a + r;
            buckets_meters.push(i as f32 * ACCEPTANCE_BUCKET_WIDTH_M);
            accept_counts.push(a);
            reject_counts.push(r);
            totals.push(total);
            acceptance_rates.push(if total == 0 { 0.0 } else { a as f64 / total as f64 });
        }

        AcceptanceSnapshot {
            buckets_meters,
            accept_counts,
            reject_counts,
            totals,
            acceptance_rates,
        }
    }
}

/// JSON shape for `GET /api/lidar/acceptance`.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptanceSnapshot {
    pub buckets_meters: Vec<f32>,
    pub accept_counts: Vec<u64>,
    pub reject_counts: Vec<u64>,
    pub totals: Vec<u64>,
    pub acceptance_rates: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_into_the_right_bucket() {
        let mut c = AcceptanceCounters::default();
        c.record(5.0, true);
        c.record(15.0, false);
        let snap = c.snapshot();
        assert_eq!(snap.accept_counts[0], 1);
        assert_eq!(snap.reject_counts[1], 1);
        assert_eq!(snap.totals[0], 1);
        assert_eq!(snap.acceptance_rates[0], 1.0);
    }

    #[test]
    fn out_of_range_falls_into_overflow_bucket() {
        let mut c = AcceptanceCounters::default();
        c.record(500.0, true);
        let snap = c.snapshot();
        assert_eq!(snap.accept_counts[NUM_ACCEPTANCE_BUCKETS - 1], 1);
    }

    #[test]
    fn reset_clears_all_buckets() {
        let mut c = AcceptanceCounters::default();
        c.record(5.0, true);
        c.reset();
        let snap = c.snapshot();
        assert_eq!(snap.totals.iter().sum::<u64>(), 0);
    }
}
