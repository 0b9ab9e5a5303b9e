//! File-backed lock store.
//!
//! One JSON record per resource under the lock directory. Lock creation
//! goes through exclusive file creation (O_EXCL), so concurrent acquirers
//! in different processes race on a kernel primitive, never on a
//! read-then-write sequence. The store is the single durable source of
//! truth: a restarted coordinator rebuilds its view purely from the
//! directory contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::LockError;

/// Durable record of one held lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource_id: String,
    pub holder_agent_id: String,
    /// Ownership token; release and renew must present it.
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What a read of a resource's lock file found.
#[derive(Debug, Clone)]
pub enum ReadState {
    /// No lock file exists.
    Absent,
    /// A parseable record is on disk (may or may not be expired).
    Held(LockRecord),
    /// A file exists but does not parse — possibly a writer mid-record,
    /// possibly debris from a crashed writer.
    Corrupt,
}

/// One entry from a full directory scan.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub state: ReadState,
    pub modified: DateTime<Utc>,
}

pub struct LockStore {
    dir: PathBuf,
}

fn store_err(resource: &str, err: impl std::fmt::Display) -> LockError {
    LockError::Store {
        resource: resource.to_string(),
        reason: err.to_string(),
    }
}

impl LockStore {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lock file path for a resource. The readable stem keeps the
    /// directory inspectable; the digest suffix keeps distinct resource
    /// ids from colliding after sanitization.
    fn path_for(&self, resource_id: &str) -> PathBuf {
        let mut stem: String = resource_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        stem.truncate(80);
        let digest = Sha256::digest(resource_id.as_bytes());
        let short = hex::encode(&digest[..4]);
        self.dir.join(format!("{stem}-{short}.lock"))
    }

    /// Atomic create-if-absent: the whole point of the store. Fails with
    /// `Busy` when any lock file for the resource already exists,
    /// regardless of its content.
    pub fn try_create(&self, record: &LockRecord) -> Result<(), LockError> {
        let path = self.path_for(&record.resource_id);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Busy {
                    resource: record.resource_id.clone(),
                })
            }
            Err(e) => return Err(store_err(&record.resource_id, e)),
        };
        let body =
            serde_json::to_vec_pretty(record).map_err(|e| store_err(&record.resource_id, e))?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| store_err(&record.resource_id, e))
    }

    /// Read the current lock state for a resource.
    pub fn read(&self, resource_id: &str) -> Result<ReadState, LockError> {
        let path = self.path_for(resource_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(match serde_json::from_slice::<LockRecord>(&bytes) {
                Ok(record) => ReadState::Held(record),
                Err(_) => ReadState::Corrupt,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ReadState::Absent),
            Err(e) => Err(store_err(resource_id, e)),
        }
    }

    /// Remove a resource's lock file. Returns false when it was already
    /// gone; concurrent removal is not an error.
    pub fn remove(&self, resource_id: &str) -> Result<bool, LockError> {
        self.remove_path(&self.path_for(resource_id), resource_id)
    }

    pub fn remove_path(&self, path: &Path, resource_hint: &str) -> Result<bool, LockError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_err(resource_hint, e)),
        }
    }

    /// Rewrite an existing record in place (renewals). Atomic via
    /// temp-file + rename within the lock directory.
    pub fn replace(&self, record: &LockRecord) -> Result<(), LockError> {
        let path = self.path_for(&record.resource_id);
        let tmp = path.with_extension("lock.tmp");
        let body =
            serde_json::to_vec_pretty(record).map_err(|e| store_err(&record.resource_id, e))?;
        fs::write(&tmp, &body).map_err(|e| store_err(&record.resource_id, e))?;
        fs::rename(&tmp, &path).map_err(|e| store_err(&record.resource_id, e))
    }

    /// Scan every lock file in the directory.
    pub fn scan(&self) -> Result<Vec<ScanEntry>, LockError> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(&self.dir).map_err(|e| store_err("<scan>", e))?;
        for entry in dir {
            let entry = entry.map_err(|e| store_err("<scan>", e))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("lock") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let state = match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<LockRecord>(&bytes) {
                    Ok(record) => ReadState::Held(record),
                    Err(_) => ReadState::Corrupt,
                },
                // Removed between listing and reading; skip.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(store_err("<scan>", e)),
            };
            entries.push(ScanEntry {
                path,
                state,
                modified,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(resource: &str, holder: &str, ttl_secs: i64) -> LockRecord {
        let now = Utc::now();
        LockRecord {
            resource_id: resource.to_string(),
            holder_agent_id: holder.to_string(),
            token: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    #[test]
    fn test_exclusive_create() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::open(dir.path()).unwrap();

        store.try_create(&record("config.json", "agent-00", 30)).unwrap();
        let err = store
            .try_create(&record("config.json", "agent-01", 30))
            .unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_distinct_resources_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::open(dir.path()).unwrap();

        // Sanitizes to the same stem; digest suffix keeps them apart.
        store.try_create(&record("a/b", "agent-00", 30)).unwrap();
        store.try_create(&record("a_b", "agent-01", 30)).unwrap();
        assert_eq!(store.scan().unwrap().len(), 2);
    }

    #[test]
    fn test_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::open(dir.path()).unwrap();

        let rec = record("schema.sql", "agent-02", 30);
        store.try_create(&rec).unwrap();
        match store.read("schema.sql").unwrap() {
            ReadState::Held(found) => {
                assert_eq!(found.token, rec.token);
                assert_eq!(found.holder_agent_id, "agent-02");
            }
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::open(dir.path()).unwrap();

        store.try_create(&record("x", "agent-00", 30)).unwrap();
        assert!(store.remove("x").unwrap());
        assert!(!store.remove("x").unwrap());
        assert!(matches!(store.read("x").unwrap(), ReadState::Absent));
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::open(dir.path()).unwrap();

        let rec = record("broken", "agent-00", 30);
        store.try_create(&rec).unwrap();
        let path = store.path_for("broken");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(store.read("broken").unwrap(), ReadState::Corrupt));
    }
}
