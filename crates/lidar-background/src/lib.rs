//! Learned background range model over the sensor's native polar grid, plus
//! the foreground extractor built on top of it (§4.6, §4.7) and the
//! range-bucketed acceptance-rate counters exposed by the admin API.

mod acceptance;
mod extractor;
mod grid;

pub use acceptance::{
    AcceptanceCounters, AcceptanceSnapshot, ACCEPTANCE_BUCKET_WIDTH_M, NUM_ACCEPTANCE_BUCKETS,
};
pub use extractor::ForegroundExtractor;
pub use grid::{BackgroundCell, BackgroundGrid, BackgroundSnapshot};
