pub mod aggregator;
pub mod stats;

pub use aggregator::{to_journey, JourneyAggregator};
pub use stats::{compute_stats, media_counts, session_stats};
