use serde::{Deserialize, Serialize};

/// Defines when a schedule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire once at an absolute or timezone-local instant.
    ///
    /// `at` is either an RFC 3339 timestamp with an explicit offset, or a
    /// naive wall-clock string resolved against `timezone`.
    Once {
        at: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fire on every instant matching a 5-field cron expression.
    Cron {
        cron: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },

    /// Fire every fixed duration.
    Interval { interval: i64, unit: IntervalUnit },

    /// Fire after a uniformly random duration in `[min_interval, max_interval]`.
    #[serde(rename_all = "camelCase")]
    Random {
        min_interval: i64,
        max_interval: i64,
        unit: IntervalUnit,
    },
}

/// Duration unit for interval-style schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
}

impl IntervalUnit {
    /// Milliseconds per unit.
    pub fn millis(self) -> i64 {
        match self {
            IntervalUnit::Seconds => 1_000,
            IntervalUnit::Minutes => 60_000,
            IntervalUnit::Hours => 3_600_000,
        }
    }
}

/// Lifecycle state of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Eligible to fire when next_run_at arrives.
    Active,
    /// Retained but never due.
    Paused,
    /// Finished (a Once schedule after its single fire).
    Completed,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Who created a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    User,
    Agent,
    System,
}

/// What the external executor does when the schedule fires.
///
/// Serializes as `{"actionType": "command", "command": "..."}` /
/// `{"actionType": "message", "message": "..."}` to match the on-disk shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionType", rename_all = "snake_case")]
pub enum ScheduleAction {
    Command { command: String },
    Message { message: String },
}

/// A persisted schedule record — one JSON file per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    /// Stable identifier; restricted to `[A-Za-z0-9_-]` because it is used
    /// verbatim as a filesystem path component.
    pub id: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
    pub created_by: CreatedBy,
    /// Owning session; absent means a global schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub action: ScheduleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ScheduleStatus,
    pub schedule: Schedule,
    /// Cached next fire time (epoch ms). Absent means "cannot compute" and
    /// the record is never treated as due.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<i64>,
}
