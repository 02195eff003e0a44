use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

/// Stored records carry epoch milliseconds; a value outside chrono's range is
/// treated as corrupt rather than clamped.
pub fn from_epoch_ms(value: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| anyhow!("{field} holds out-of-range timestamp {value}"))
}
