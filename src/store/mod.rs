//! Persistence: the raw key-value layer and the typed views built on it.

pub mod keys;
mod kv;
mod preferences;
mod quota;
mod safelist;
mod timestamps;

pub use kv::{read_json, write_json, KvChange, KvStore, MemoryKvStore, SqliteKvStore};
pub use preferences::{clamp_percentage, Preferences, DEFAULT_SKIP_PERCENTAGE};
pub use quota::QuotaTracker;
pub use safelist::SafeList;
pub use timestamps::TimestampStore;
