//! `chime-scheduler` — filesystem-resident schedule execution core.
//!
//! # Overview
//!
//! Schedule records are persisted one-JSON-file-per-record under
//! `<root>/schedules/`, with a sibling `locks/` directory of TTL-bounded
//! advisory lock files. Any number of processes may poll the same root: the
//! [`engine::SchedulerEngine`] queries due records each tick, takes the
//! per-id lock, dispatches the record to an executor channel, recomputes
//! `nextRunAt` and releases. Coordination is purely filesystem-based —
//! single host, multi-process, no network consensus.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                                 |
//! |------------|-----------------------------------------------------------|
//! | `once`     | Single fire at an absolute or timezone-local instant      |
//! | `cron`     | Every instant matching a 5-field expression (tz-aware)    |
//! | `interval` | Repeat every fixed duration (minimum 1 second)            |
//! | `random`   | Repeat after a uniform draw in `[min, max]` per run       |

pub mod cron;
pub mod engine;
pub mod error;
pub mod lock;
pub mod schedule;
pub mod store;
pub mod types;

pub use cron::CronExpr;
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use lock::LockManager;
pub use schedule::{compute_next_run, validate_schedule};
pub use store::{ListFilter, NewSchedule, ScheduleStore};
pub use types::{
    CreatedBy, IntervalUnit, Schedule, ScheduleAction, ScheduleRecord, ScheduleStatus,
};
