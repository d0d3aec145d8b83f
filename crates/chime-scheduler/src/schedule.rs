//! Next-run computation for every schedule kind.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use rand::Rng;
use tracing::warn;

use crate::cron::CronExpr;
use crate::types::{IntervalUnit, Schedule};

/// Compute the next execution time (epoch ms) strictly after `from_ms`.
///
/// Returns `None` when no next run exists: a `Once` instant that already
/// passed, an unparsable cron expression or timestamp, a non-positive
/// interval, or inverted random bounds. Callers must treat a record without
/// a next run as "never due", not as "due now".
pub fn compute_next_run(schedule: &Schedule, from_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::Once { at, timezone } => {
            let at_ms = parse_instant(at, timezone.as_deref())?;
            // A Once time in the past never fires.
            if at_ms > from_ms {
                Some(at_ms)
            } else {
                None
            }
        }

        Schedule::Cron { cron, timezone } => {
            let expr = match CronExpr::parse(cron) {
                Ok(expr) => expr,
                Err(e) => {
                    warn!("unparsable cron expression `{cron}`: {e}");
                    return None;
                }
            };
            let tz = match timezone.as_deref() {
                Some(name) => Some(parse_timezone(name)?),
                None => None,
            };
            expr.next_after(from_ms, tz)
        }

        Schedule::Interval { interval, unit } => {
            if *interval <= 0 {
                return None;
            }
            // Overflowing the epoch-millis range means there is no next run.
            interval
                .checked_mul(unit.millis())
                .and_then(|delta| from_ms.checked_add(delta))
        }

        Schedule::Random {
            min_interval,
            max_interval,
            unit,
        } => {
            if *min_interval <= 0 || *max_interval <= 0 || min_interval > max_interval {
                return None;
            }
            let drawn = rand::thread_rng().gen_range(*min_interval..=*max_interval);
            drawn
                .checked_mul(unit.millis())
                .and_then(|delta| from_ms.checked_add(delta))
        }
    }
}

/// Validate a schedule definition for persistence.
///
/// Unlike [`compute_next_run`], problems here are surfaced to the creator as
/// explicit errors rather than degraded to `None`.
pub fn validate_schedule(schedule: &Schedule) -> crate::error::Result<()> {
    use crate::error::SchedulerError;
    match schedule {
        Schedule::Once { at, timezone } => {
            if let Some(name) = timezone.as_deref() {
                parse_timezone(name).ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!("unknown timezone `{name}`"))
                })?;
            }
            parse_instant(at, timezone.as_deref()).ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!("unparsable timestamp `{at}`"))
            })?;
            Ok(())
        }
        Schedule::Cron { cron, timezone } => {
            CronExpr::parse(cron)?;
            if let Some(name) = timezone.as_deref() {
                parse_timezone(name).ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!("unknown timezone `{name}`"))
                })?;
            }
            Ok(())
        }
        Schedule::Interval { interval, .. } => {
            if *interval <= 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be at least 1".into(),
                ));
            }
            Ok(())
        }
        Schedule::Random {
            min_interval,
            max_interval,
            ..
        } => {
            if *min_interval <= 0 || *max_interval <= 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "random bounds must be positive".into(),
                ));
            }
            if min_interval > max_interval {
                return Err(SchedulerError::InvalidSchedule(
                    "random minInterval exceeds maxInterval".into(),
                ));
            }
            Ok(())
        }
    }
}

fn parse_timezone(name: &str) -> Option<Tz> {
    match name.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            warn!("unknown timezone `{name}`");
            None
        }
    }
}

/// Parse a `once` timestamp: RFC 3339 with an explicit offset is taken
/// literally; otherwise the string is read as naive wall-clock time and
/// resolved in `timezone` (UTC when unset). DST-ambiguous local times take
/// the earlier instant.
fn parse_instant(at: &str, timezone: Option<&str>) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(at) {
        return Some(dt.timestamp_millis());
    }

    let naive = parse_naive(at)?;
    match timezone {
        Some(name) => {
            let tz = parse_timezone(name)?;
            tz.from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp_millis())
        }
        None => Some(naive.and_utc().timestamp_millis()),
    }
}

fn parse_naive(at: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(at, format) {
            return Some(naive);
        }
    }
    None
}
