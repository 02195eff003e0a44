mod prefetch;
mod safelist;
mod segment;

pub use prefetch::PrefetchCacheEntry;
pub use safelist::SafeListEntry;
pub use segment::{AdSegment, TimestampRecord, VideoInfo};
