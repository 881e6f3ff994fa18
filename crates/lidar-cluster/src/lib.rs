//! Foreground point clustering (§4.8) and oriented-bounding-box estimation
//! (§4.9) over world-frame foreground points.

mod clusterer;
mod obb;

pub use clusterer::cluster_points;
pub use obb::{circular_blend, estimate_obb, HeadingHints};
