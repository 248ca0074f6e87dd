//! Analysis modules.
//!
//! Neighborhood statistics, chained near analysis and threshold scoring.
//! Everything here works on in-memory tables; reading and writing files is
//! left to `io`.

pub mod aggregator;
pub mod kdtree;
pub mod near;
pub mod neighbors;
pub mod scoring;

pub use aggregator::StatsContext;
pub use near::{chained_near_analysis, chained_near_analysis_filter, NearMethod, NearOptions};
pub use neighbors::compute_neighborhood_stats;
pub use scoring::{chained_scoring, Thresholds};
