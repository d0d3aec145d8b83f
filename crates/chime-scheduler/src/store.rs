//! Durable per-record schedule persistence.
//!
//! One JSON file per record under `<root>/schedules/`. Writes are atomic
//! (temp file + rename) so concurrent pollers never observe a partial
//! record. Batch reads are resilient: a corrupt file is skipped, never
//! allowed to abort a scan.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use chime_core::time::now_ms;

use crate::error::{Result, SchedulerError};
use crate::schedule::{compute_next_run, validate_schedule};
use crate::types::{CreatedBy, Schedule, ScheduleAction, ScheduleRecord, ScheduleStatus};

/// Everything a caller supplies when creating a schedule; the store stamps
/// the audit fields and the initial next run.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub id: String,
    pub created_by: CreatedBy,
    pub session_id: Option<String>,
    pub action: ScheduleAction,
    pub description: Option<String>,
    pub schedule: Schedule,
}

/// Session scoping for [`ScheduleStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to this session's records plus global (session-less) ones.
    pub session_id: Option<String>,
    /// Return everything regardless of session.
    pub include_all: bool,
}

/// File-backed schedule store rooted at one directory.
///
/// Constructor-injected by design — multiple stores pointed at different
/// roots coexist safely, and tests get an isolated root each.
pub struct ScheduleStore {
    dir: PathBuf,
}

impl ScheduleStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join("schedules"),
        }
    }

    /// Directory holding the record files (`<root>/schedules`).
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate, stamp and persist a new schedule.
    ///
    /// Fails when the id is unsafe, the schedule definition is invalid, or
    /// the first run cannot be computed — a record is never persisted with
    /// an unknown `nextRunAt`.
    pub fn create(&self, new: NewSchedule) -> Result<ScheduleRecord> {
        validate_id(&new.id)?;
        validate_schedule(&new.schedule)?;

        let now = now_ms();
        let next_run_at = compute_next_run(&new.schedule, now).ok_or_else(|| {
            SchedulerError::InvalidSchedule(
                "unable to compute a first run for this schedule".into(),
            )
        })?;

        let record = ScheduleRecord {
            id: new.id,
            created_at: now,
            updated_at: now,
            created_by: new.created_by,
            session_id: new.session_id,
            action: new.action,
            description: new.description,
            status: ScheduleStatus::Active,
            schedule: new.schedule,
            next_run_at: Some(next_run_at),
        };
        self.save(&record)?;
        debug!(schedule_id = %record.id, next_run_at, "schedule created");
        Ok(record)
    }

    /// Write the full record atomically (temp file + rename).
    pub fn save(&self, record: &ScheduleRecord) -> Result<()> {
        validate_id(&record.id)?;
        fs::create_dir_all(&self.dir)?;

        let path = self.record_path(&record.id);
        // Per-writer-unique temp name: concurrent savers must not overwrite
        // each other's staging file before the rename.
        let tmp = self
            .dir
            .join(format!("{}.json.{}.tmp", record.id, uuid::Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read one record. Missing, unreadable or malformed files are all
    /// "not found" — callers iterating many records must not be aborted by
    /// one bad file.
    pub fn get(&self, id: &str) -> Option<ScheduleRecord> {
        if validate_id(id).is_err() {
            return None;
        }
        let path = self.record_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(schedule_id = %id, "failed to read schedule record: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(schedule_id = %id, "skipping malformed schedule record: {e}");
                None
            }
        }
    }

    /// All parseable records, session-scoped per `filter`, ordered by
    /// creation time. Corrupt files are skipped with a warning.
    pub fn list(&self, filter: &ListFilter) -> Vec<ScheduleRecord> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("failed to read schedule directory: {e}");
                return Vec::new();
            }
        };

        let mut records: Vec<ScheduleRecord> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| {
                let raw = fs::read_to_string(&path).ok()?;
                match serde_json::from_str::<ScheduleRecord>(&raw) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(path = %path.display(), "skipping malformed schedule record: {e}");
                        None
                    }
                }
            })
            .filter(|record| {
                if filter.include_all {
                    return true;
                }
                match (&filter.session_id, &record.session_id) {
                    (Some(caller), Some(owner)) => caller == owner,
                    // Global records are visible to every session.
                    (_, None) => true,
                    (None, Some(_)) => false,
                }
            })
            .collect();

        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Active records whose `nextRunAt` has elapsed, across all sessions.
    pub fn due(&self, now_ms: i64) -> Vec<ScheduleRecord> {
        self.list(&ListFilter {
            session_id: None,
            include_all: true,
        })
        .into_iter()
        .filter(|r| {
            r.status == ScheduleStatus::Active && r.next_run_at.is_some_and(|next| next <= now_ms)
        })
        .collect()
    }

    /// Read-modify-write. Returns `Ok(None)` when the record does not exist
    /// (never creates one); bumps `updatedAt` on success.
    pub fn update(
        &self,
        id: &str,
        apply: impl FnOnce(&mut ScheduleRecord),
    ) -> Result<Option<ScheduleRecord>> {
        let Some(mut record) = self.get(id) else {
            return Ok(None);
        };
        apply(&mut record);
        record.updated_at = now_ms();
        self.save(&record)?;
        Ok(Some(record))
    }

    /// Remove a record. Idempotent: `Ok(false)` when already absent.
    pub fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

/// Ids become filesystem path components verbatim, so anything outside
/// `[A-Za-z0-9_-]` is rejected before a path is ever derived.
pub fn validate_id(id: &str) -> Result<()> {
    let safe = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        Ok(())
    } else {
        Err(SchedulerError::InvalidId { id: id.to_string() })
    }
}
