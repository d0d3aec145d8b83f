use thiserror::Error;

/// Errors surfaced by the scheduler subsystem.
///
/// Parse-level problems (malformed cron in a stored record, bad timestamps,
/// corrupt JSON encountered during batch scans) degrade to skipped records
/// or a `None` next-run instead of appearing here; this type covers
/// validation failures and I/O the caller must know about.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The id is unusable as a filesystem path component.
    #[error("Invalid schedule id `{id}`: only alphanumerics, `-` and `_` are allowed")]
    InvalidId { id: String },

    /// The schedule definition is invalid (bad cron, non-positive interval,
    /// inverted random bounds, or an uncomputable first run).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
