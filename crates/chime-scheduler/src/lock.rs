//! TTL-bounded advisory lock files — one per schedule id.
//!
//! The lock file is the only cross-process synchronization primitive:
//! whichever poller wins the exclusive create executes the schedule, and a
//! holder that dies is recovered by peers once the TTL elapses. Cooperative
//! only: nothing stops a caller that never checks.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chime_core::time::now_ms;

use crate::error::Result;
use crate::store::validate_id;

/// Takeover attempts when an existing lock proves stale or corrupt. A
/// counted bound keeps two racing reapers from chasing each other forever.
const TAKEOVER_RETRIES: u32 = 2;

/// On-disk lock shape: `{ownerId, createdAt, updatedAt, ttlMs}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFile {
    owner_id: String,
    created_at: i64,
    updated_at: i64,
    ttl_ms: i64,
}

impl LockFile {
    fn is_stale(&self, now: i64) -> bool {
        now - self.updated_at > self.ttl_ms
    }
}

/// Manages `<root>/schedules/locks/<id>.lock.json` files.
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join("schedules").join("locks"),
        }
    }

    /// Try to take the lock for `id`. Returns `false` when another owner
    /// legitimately holds it — a normal "skip this tick" outcome, not an
    /// error. Stale or unreadable locks are reclaimed, bounded to
    /// [`TAKEOVER_RETRIES`] extra attempts.
    pub fn acquire(&self, id: &str, owner_id: &str, ttl_ms: i64) -> Result<bool> {
        validate_id(id)?;
        fs::create_dir_all(&self.dir)?;

        let path = self.lock_path(id);
        for attempt in 0..=TAKEOVER_RETRIES {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let now = now_ms();
                    let lock = LockFile {
                        owner_id: owner_id.to_string(),
                        created_at: now,
                        updated_at: now,
                        ttl_ms,
                    };
                    file.write_all(&serde_json::to_vec(&lock)?)?;
                    debug!(schedule_id = %id, owner_id = %owner_id, attempt, "lock acquired");
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_lock(&path) {
                        Some(existing) if !existing.is_stale(now_ms()) => {
                            // Legitimately held.
                            return Ok(false);
                        }
                        Some(existing) => {
                            debug!(
                                schedule_id = %id,
                                prior_owner = %existing.owner_id,
                                "reclaiming stale lock"
                            );
                            let _ = fs::remove_file(&path);
                        }
                        None => {
                            // Unreadable or corrupt: treat like stale.
                            warn!(schedule_id = %id, "reclaiming unreadable lock file");
                            let _ = fs::remove_file(&path);
                        }
                    }
                    // Loop re-attempts the exclusive create; a racing peer
                    // may have already won, in which case the next pass
                    // observes a fresh lock and returns false.
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Release the lock, but only if `owner_id` still owns it. A mismatch
    /// (the lock was reclaimed after our TTL lapsed) is a logged no-op so a
    /// slow holder cannot release its successor's lock.
    pub fn release(&self, id: &str, owner_id: &str) {
        if validate_id(id).is_err() {
            warn!(schedule_id = %id, "release skipped: unsafe schedule id");
            return;
        }
        let path = self.lock_path(id);
        match read_lock(&path) {
            Some(lock) if lock.owner_id == owner_id => {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(schedule_id = %id, "failed to remove lock file: {e}");
                    }
                }
            }
            Some(lock) => {
                warn!(
                    schedule_id = %id,
                    holder = %lock.owner_id,
                    caller = %owner_id,
                    "release skipped: lock owned by someone else"
                );
            }
            None => {}
        }
    }

    /// Extend the TTL window of a held lock by rewriting `updatedAt`.
    /// Returns `false` when the lock is absent or owned by someone else.
    pub fn refresh(&self, id: &str, owner_id: &str) -> Result<bool> {
        validate_id(id)?;
        let path = self.lock_path(id);
        let Some(mut lock) = read_lock(&path) else {
            return Ok(false);
        };
        if lock.owner_id != owner_id {
            return Ok(false);
        }
        lock.updated_at = now_ms();

        // Atomic replace so a concurrent reader never sees a torn lock. The
        // temp name is per-writer unique so peers cannot clobber each other's
        // staging file.
        let tmp = self
            .dir
            .join(format!("{id}.lock.json.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_vec(&lock)?)?;
        fs::rename(&tmp, &path)?;
        Ok(true)
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.lock.json"))
    }
}

fn read_lock(path: &Path) -> Option<LockFile> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, LockManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let locks = LockManager::new(dir.path());
        (dir, locks)
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let (_dir, locks) = manager();
        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));
        assert!(!locks.acquire("x", "owner-b", 1_000).expect("acquire"));
    }

    #[test]
    fn release_then_reacquire() {
        let (_dir, locks) = manager();
        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));
        locks.release("x", "owner-a");
        assert!(locks.acquire("x", "owner-b", 1_000).expect("acquire"));
    }

    #[test]
    fn stale_lock_is_taken_over_and_old_release_is_noop() {
        let (dir, locks) = manager();
        // Plant an expired lock directly instead of sleeping through a TTL.
        let lock_dir = dir.path().join("schedules/locks");
        fs::create_dir_all(&lock_dir).expect("mkdir");
        let expired = LockFile {
            owner_id: "owner-a".into(),
            created_at: now_ms() - 10_000,
            updated_at: now_ms() - 5_000,
            ttl_ms: 1_000,
        };
        fs::write(
            lock_dir.join("x.lock.json"),
            serde_json::to_vec(&expired).expect("encode"),
        )
        .expect("write");

        assert!(locks.acquire("x", "owner-b", 1_000).expect("acquire"));

        // owner-a's late release must not free owner-b's lock.
        locks.release("x", "owner-a");
        assert!(!locks.acquire("x", "owner-c", 1_000).expect("acquire"));
    }

    #[test]
    fn corrupt_lock_is_taken_over() {
        let (dir, locks) = manager();
        let lock_dir = dir.path().join("schedules/locks");
        fs::create_dir_all(&lock_dir).expect("mkdir");
        fs::write(lock_dir.join("x.lock.json"), "garbage").expect("write");

        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));
    }

    #[test]
    fn refresh_extends_only_for_owner() {
        let (dir, locks) = manager();
        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));

        assert!(!locks.refresh("x", "owner-b").expect("refresh"));
        assert!(locks.refresh("x", "owner-a").expect("refresh"));

        let raw = fs::read(dir.path().join("schedules/locks/x.lock.json")).expect("read");
        let lock: LockFile = serde_json::from_slice(&raw).expect("parse");
        assert_eq!(lock.owner_id, "owner-a");
        assert!(lock.updated_at >= lock.created_at);
    }

    #[test]
    fn refresh_absent_lock_is_false() {
        let (_dir, locks) = manager();
        assert!(!locks.refresh("ghost", "owner-a").expect("refresh"));
    }

    #[test]
    fn different_ids_lock_independently() {
        let (_dir, locks) = manager();
        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));
        assert!(locks.acquire("y", "owner-b", 1_000).expect("acquire"));
    }

    #[test]
    fn unsafe_id_is_an_error() {
        let (_dir, locks) = manager();
        assert!(locks.acquire("../x", "owner-a", 1_000).is_err());
        assert!(locks.refresh("../x", "owner-a").is_err());
    }

    #[test]
    fn release_with_unsafe_id_is_noop() {
        let (dir, locks) = manager();
        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));
        locks.release("../../x", "owner-a");
        // The held lock is untouched.
        assert!(dir.path().join("schedules/locks/x.lock.json").exists());
    }

    #[test]
    fn refresh_leaves_no_staging_files() {
        let (dir, locks) = manager();
        assert!(locks.acquire("x", "owner-a", 1_000).expect("acquire"));
        assert!(locks.refresh("x", "owner-a").expect("refresh"));

        let names: Vec<String> = fs::read_dir(dir.path().join("schedules/locks"))
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.lock.json".to_string()]);
    }
}
