//! Polling engine: the per-process loop that executes due schedules.
//!
//! Several engines may poll the same root concurrently (separate processes
//! or tests); the per-schedule lock file guarantees at most one of them
//! executes a given id at a time. A failed acquire just defers the record
//! to the next tick.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chime_core::config::SchedulerConfig;
use chime_core::time::now_ms;

use crate::lock::LockManager;
use crate::schedule::compute_next_run;
use crate::store::ScheduleStore;
use crate::types::{Schedule, ScheduleRecord, ScheduleStatus};

pub struct SchedulerEngine {
    store: ScheduleStore,
    locks: LockManager,
    /// Identifies this engine instance as a lock owner.
    owner_id: String,
    tick_secs: u64,
    lock_ttl_ms: i64,
    /// If set, fired records are sent here for execution routing.
    fired_tx: Option<mpsc::Sender<ScheduleRecord>>,
}

impl SchedulerEngine {
    /// Create an engine over an injected store and lock manager.
    ///
    /// Pass `Some(tx)` to receive every fired [`ScheduleRecord`] via mpsc.
    /// The sender is non-blocking (`try_send`) so the tick loop is never
    /// stalled by a slow executor.
    pub fn new(
        store: ScheduleStore,
        locks: LockManager,
        config: &SchedulerConfig,
        fired_tx: Option<mpsc::Sender<ScheduleRecord>>,
    ) -> Self {
        Self {
            store,
            locks,
            owner_id: Uuid::new_v4().to_string(),
            tick_secs: config.tick_secs,
            lock_ttl_ms: config.lock_ttl_ms,
            fired_tx,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Main loop: poll on a fixed tick until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(owner_id = %self.owner_id, tick_secs = self.tick_secs, "scheduler engine started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.tick_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_at(now_ms());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process every schedule due at `now`: lock, dispatch, advance,
    /// release. One broken record never aborts the rest of the tick.
    pub fn tick_at(&self, now: i64) {
        for record in self.store.due(now) {
            let acquired = match self.locks.acquire(&record.id, &self.owner_id, self.lock_ttl_ms) {
                Ok(acquired) => acquired,
                Err(e) => {
                    error!(schedule_id = %record.id, "lock acquire failed: {e}");
                    continue;
                }
            };
            if !acquired {
                debug!(schedule_id = %record.id, "locked by another poller, deferring");
                continue;
            }

            self.fire(&record, now);
            self.locks.release(&record.id, &self.owner_id);
        }
    }

    fn fire(&self, record: &ScheduleRecord, now: i64) {
        info!(schedule_id = %record.id, "executing schedule");

        if let Some(ref tx) = self.fired_tx {
            // try_send never blocks the tick loop.
            if tx.try_send(record.clone()).is_err() {
                warn!(schedule_id = %record.id, "executor channel full or closed, run dropped");
            }
        }

        let advanced = self.store.update(&record.id, |r| match r.schedule {
            Schedule::Once { .. } => {
                r.status = ScheduleStatus::Completed;
                r.next_run_at = None;
            }
            _ => {
                r.next_run_at = compute_next_run(&r.schedule, now);
                if r.next_run_at.is_none() {
                    // Schedule became uncomputable (e.g. the cron expression
                    // no longer yields a match). The record stays visible for
                    // repair but is never treated as due.
                    warn!(schedule_id = %r.id, "no next run computable, schedule idled");
                }
            }
        });

        match advanced {
            Ok(Some(updated)) => {
                debug!(
                    schedule_id = %record.id,
                    next_run_at = ?updated.next_run_at,
                    status = %updated.status,
                    "schedule advanced"
                );
            }
            Ok(None) => {
                // Deleted while we held the lock; nothing to advance.
                debug!(schedule_id = %record.id, "record vanished during execution");
            }
            Err(e) => {
                error!(schedule_id = %record.id, "failed to persist next run: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewSchedule;
    use crate::types::{CreatedBy, IntervalUnit, ScheduleAction};
    use chrono::DateTime;

    fn ms(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s)
            .expect("test timestamp")
            .timestamp_millis()
    }

    fn engine_at(
        root: &std::path::Path,
        fired_tx: Option<mpsc::Sender<ScheduleRecord>>,
    ) -> SchedulerEngine {
        SchedulerEngine::new(
            ScheduleStore::new(root),
            LockManager::new(root),
            &SchedulerConfig::default(),
            fired_tx,
        )
    }

    fn cron_record(id: &str, cron: &str, t0: i64, next: i64) -> ScheduleRecord {
        ScheduleRecord {
            id: id.into(),
            created_at: t0,
            updated_at: t0,
            created_by: CreatedBy::User,
            session_id: None,
            action: ScheduleAction::Message {
                message: "ping".into(),
            },
            description: None,
            status: ScheduleStatus::Active,
            schedule: Schedule::Cron {
                cron: cron.into(),
                timezone: None,
            },
            next_run_at: Some(next),
        }
    }

    #[test]
    fn cron_end_to_end_advances_by_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(8);
        let engine = engine_at(dir.path(), Some(tx));

        let t0 = ms("2026-02-01T00:00:00Z");
        let first = ms("2026-02-01T00:05:00Z");
        engine
            .store()
            .save(&cron_record("s1", "*/5 * * * *", t0, first))
            .expect("save");

        // before the fire time nothing happens
        engine.tick_at(first - 1);
        assert!(rx.try_recv().is_err());

        engine.tick_at(first);
        let fired = rx.try_recv().expect("fired");
        assert_eq!(fired.id, "s1");

        let after = engine.store().get("s1").expect("record");
        assert_eq!(after.status, ScheduleStatus::Active);
        assert_eq!(after.next_run_at, Some(ms("2026-02-01T00:10:00Z")));

        // the lock was released
        assert!(!dir.path().join("schedules/locks/s1.lock.json").exists());
    }

    #[test]
    fn once_completes_after_single_fire() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(8);
        let engine = engine_at(dir.path(), Some(tx));

        let at = ms("2026-03-01T09:00:00Z");
        let mut record = cron_record("once-1", "* * * * *", at - 60_000, at);
        record.schedule = Schedule::Once {
            at: "2026-03-01T09:00:00Z".into(),
            timezone: None,
        };
        engine.store().save(&record).expect("save");

        engine.tick_at(at);
        assert_eq!(rx.try_recv().expect("fired").id, "once-1");

        let after = engine.store().get("once-1").expect("record");
        assert_eq!(after.status, ScheduleStatus::Completed);
        assert!(after.next_run_at.is_none());

        // completed records never fire again
        engine.tick_at(at + 60_000);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn contended_schedule_is_skipped_until_next_tick() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(8);
        let engine = engine_at(dir.path(), Some(tx));

        let t0 = ms("2026-02-01T00:00:00Z");
        let first = ms("2026-02-01T00:05:00Z");
        engine
            .store()
            .save(&cron_record("s1", "*/5 * * * *", t0, first))
            .expect("save");

        // another poller holds the lock
        let other = LockManager::new(dir.path());
        assert!(other.acquire("s1", "rival-poller", 60_000).expect("acquire"));

        engine.tick_at(first);
        assert!(rx.try_recv().is_err());
        let untouched = engine.store().get("s1").expect("record");
        assert_eq!(untouched.next_run_at, Some(first));

        // once the rival releases, the next tick runs it
        other.release("s1", "rival-poller");
        engine.tick_at(first);
        assert_eq!(rx.try_recv().expect("fired").id, "s1");
    }

    #[test]
    fn interval_advances_relative_to_fire_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_at(dir.path(), None);

        let t0 = 1_700_000_000_000;
        let mut record = cron_record("iv", "* * * * *", t0, t0 + 30_000);
        record.schedule = Schedule::Interval {
            interval: 30,
            unit: IntervalUnit::Seconds,
        };
        engine.store().save(&record).expect("save");

        // fires late: next run is measured from the actual fire time
        let fired_at = t0 + 45_000;
        engine.tick_at(fired_at);
        let after = engine.store().get("iv").expect("record");
        assert_eq!(after.next_run_at, Some(fired_at + 30_000));
    }

    #[test]
    fn full_executor_channel_still_reschedules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(cron_record("filler", "* * * * *", 0, 1))
            .expect("fill");
        let engine = engine_at(dir.path(), Some(tx));

        let t0 = ms("2026-02-01T00:00:00Z");
        let first = ms("2026-02-01T00:05:00Z");
        engine
            .store()
            .save(&cron_record("s1", "*/5 * * * *", t0, first))
            .expect("save");

        engine.tick_at(first);
        let after = engine.store().get("s1").expect("record");
        assert_eq!(after.next_run_at, Some(ms("2026-02-01T00:10:00Z")));
    }

    #[test]
    fn corrupt_sibling_record_does_not_abort_tick() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(8);
        let engine = engine_at(dir.path(), Some(tx));

        let t0 = ms("2026-02-01T00:00:00Z");
        let first = ms("2026-02-01T00:05:00Z");
        engine
            .store()
            .save(&cron_record("s1", "*/5 * * * *", t0, first))
            .expect("save");
        std::fs::create_dir_all(dir.path().join("schedules")).expect("mkdir");
        std::fs::write(dir.path().join("schedules/junk.json"), "oops").expect("write");

        engine.tick_at(first);
        assert_eq!(rx.try_recv().expect("fired").id, "s1");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_at(dir.path(), None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(engine.run(shutdown_rx));
        shutdown_tx.send(true).expect("signal");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked");
    }
}
