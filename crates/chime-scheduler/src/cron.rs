//! 5-field cron expression parsing and timezone-correct evaluation.
//!
//! Fields: minute (0-59), hour (0-23), day-of-month (1-31), month (1-12),
//! weekday (0-6, 0 = Sunday). Each field accepts `*`, comma lists, `a-b`
//! ranges and `base/step` where the base is `*`, a number or a range.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Scan bound for next-run searches: ~366 days of minutes. Unsatisfiable
/// expressions (`31 2 30 2 *`) terminate with "no next run".
const MAX_SCAN_MINUTES: u32 = 527_040;

/// One parsed cron field — the set of values it matches.
#[derive(Debug, Clone)]
struct CronField {
    values: BTreeSet<u32>,
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// Parse a cron expression into per-field value sets.
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "cron expression `{raw}` must have 5 fields: minute hour day month weekday"
            )));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether the instant's wall-clock components match all five fields.
    pub fn matches<Z: TimeZone>(&self, at: &DateTime<Z>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }

    /// First matching minute boundary strictly after `from_ms`, evaluated in
    /// `tz` when set (host-independent wall-clock matching), UTC otherwise.
    pub fn next_after(&self, from_ms: i64, tz: Option<Tz>) -> Option<i64> {
        // Truncate to the minute, then advance one minute per scan step.
        let mut candidate = (from_ms.div_euclid(MILLIS_PER_MINUTE) + 1) * MILLIS_PER_MINUTE;

        for _ in 0..MAX_SCAN_MINUTES {
            let utc = Utc.timestamp_millis_opt(candidate).single()?;
            let matched = match tz {
                Some(tz) => self.matches(&utc.with_timezone(&tz)),
                None => self.matches(&utc),
            };
            if matched {
                return Some(candidate);
            }
            candidate += MILLIS_PER_MINUTE;
        }
        None
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<CronField> {
    let mut values = BTreeSet::new();
    for segment in raw.split(',') {
        parse_segment(segment, min, max, &mut values)?;
    }
    if values.is_empty() {
        return Err(SchedulerError::InvalidSchedule(format!(
            "cron field `{raw}` matches nothing"
        )));
    }
    Ok(CronField { values })
}

fn parse_segment(raw: &str, min: u32, max: u32, values: &mut BTreeSet<u32>) -> Result<()> {
    let (base, step) = match raw.split_once('/') {
        Some((base, step_raw)) => {
            let step: u32 = step_raw.parse().map_err(|_| {
                SchedulerError::InvalidSchedule(format!("invalid cron step `{step_raw}`"))
            })?;
            if step == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "cron step must be positive".into(),
                ));
            }
            (base, step)
        }
        None => (raw, 1),
    };

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((lo, hi)) = base.split_once('-') {
        (parse_atom(lo, min, max)?, parse_atom(hi, min, max)?)
    } else {
        let value = parse_atom(base, min, max)?;
        // A bare numeric base with a step runs to the end of the field's
        // range (`5/15` in the minute field is 5,20,35,50).
        if step > 1 {
            (value, max)
        } else {
            (value, value)
        }
    };

    if start > end {
        return Err(SchedulerError::InvalidSchedule(format!(
            "invalid cron range `{raw}`"
        )));
    }

    let mut value = start;
    while value <= end {
        values.insert(value);
        match value.checked_add(step) {
            Some(next) => value = next,
            None => break,
        }
    }
    Ok(())
}

fn parse_atom(raw: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = raw.parse().map_err(|_| {
        SchedulerError::InvalidSchedule(format!("invalid cron value `{raw}`"))
    })?;
    if value < min || value > max {
        return Err(SchedulerError::InvalidSchedule(format!(
            "cron value `{raw}` out of bounds ({min}..={max})"
        )));
    }
    Ok(value)
}
