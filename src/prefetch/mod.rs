//! Caption availability badges for listing pages.

mod cache;
mod queue;

pub use cache::PrefetchCache;
pub use queue::{BadgeTarget, PrefetchQueue, ScheduleOutcome};
