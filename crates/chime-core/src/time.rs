//! Epoch-millisecond clock helpers.
//!
//! All persisted timestamps in chime are epoch milliseconds; keeping the
//! conversion in one place avoids unit drift between crates.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
