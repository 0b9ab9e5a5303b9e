//! Lock manager: the only API over the lock store.
//!
//! `acquire` never blocks and never queues — it answers "free or busy" at
//! the instant of the call; fairness between competing tasks is the
//! coordinator's concern. TTL expiry is the only way a lock is released
//! without its holder's consent, and the forced-release paths exist solely
//! for the emergency controller.

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{LockRecord, LockStore, ReadState};
use crate::error::LockError;

/// Token proving ownership of one lock.
pub type LockToken = Uuid;

pub struct LockManager {
    store: LockStore,
    default_ttl: Duration,
}

impl LockManager {
    pub fn open(dir: impl Into<std::path::PathBuf>, default_ttl_secs: u64) -> std::io::Result<Self> {
        Ok(Self {
            store: LockStore::open(dir)?,
            default_ttl: Duration::seconds(default_ttl_secs as i64),
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Acquire an exclusive lock. Succeeds iff no live lock exists for the
    /// resource. Atomic across processes: the decision happens at the
    /// store's exclusive-create primitive, not in a read-then-write.
    pub fn acquire(
        &self,
        resource_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<LockToken, LockError> {
        let now = Utc::now();
        let record = LockRecord {
            resource_id: resource_id.to_string(),
            holder_agent_id: agent_id.to_string(),
            token: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        match self.store.try_create(&record) {
            Ok(()) => {
                debug!(resource = resource_id, agent = agent_id, "lock acquired");
                Ok(record.token)
            }
            Err(LockError::Busy { .. }) => match self.store.read(resource_id)? {
                ReadState::Held(existing) if !existing.is_expired_at(now) => {
                    Err(LockError::Busy {
                        resource: resource_id.to_string(),
                    })
                }
                // A writer may be mid-record; treat as busy rather than
                // steal.
                ReadState::Corrupt => Err(LockError::Busy {
                    resource: resource_id.to_string(),
                }),
                // Expired or vanished: clear and retry the exclusive
                // create exactly once. Losing that race means someone
                // else got there first — that is a plain Busy.
                _ => {
                    self.store.remove(resource_id)?;
                    self.store.try_create(&record)?;
                    debug!(
                        resource = resource_id,
                        agent = agent_id,
                        "lock acquired after clearing expired record"
                    );
                    Ok(record.token)
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Acquire with the manager's configured default TTL.
    pub fn acquire_default(&self, resource_id: &str, agent_id: &str) -> Result<LockToken, LockError> {
        self.acquire(resource_id, agent_id, self.default_ttl)
    }

    /// Release a held lock. Refused with `NotHolder` when the token does
    /// not match the current record — the case of an expired lock that
    /// was reclaimed and handed to someone else.
    pub fn release(&self, resource_id: &str, token: &LockToken) -> Result<(), LockError> {
        match self.store.read(resource_id)? {
            ReadState::Held(record) if record.token == *token => {
                self.store.remove(resource_id)?;
                debug!(resource = resource_id, "lock released");
                Ok(())
            }
            _ => Err(LockError::NotHolder {
                resource: resource_id.to_string(),
            }),
        }
    }

    /// Extend a held lock's deadline. Long-running tasks renew to avoid a
    /// false reclaim.
    pub fn renew(
        &self,
        resource_id: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<(), LockError> {
        let now = Utc::now();
        match self.store.read(resource_id)? {
            ReadState::Held(mut record) if record.token == *token => {
                if record.is_expired_at(now) {
                    return Err(LockError::Expired {
                        resource: resource_id.to_string(),
                    });
                }
                record.expires_at = now + ttl;
                self.store.replace(&record)
            }
            _ => Err(LockError::NotHolder {
                resource: resource_id.to_string(),
            }),
        }
    }

    /// Remove every lock past its deadline, returning the reclaimed
    /// records for reporting. Idempotent; run on every reconciliation
    /// tick. Unparsable files are cleared once older than the default TTL
    /// (debris from a crashed writer).
    pub fn reclaim_expired(&self) -> Result<Vec<LockRecord>, LockError> {
        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for entry in self.store.scan()? {
            match entry.state {
                ReadState::Held(record) if record.is_expired_at(now) => {
                    if self.store.remove(&record.resource_id)? {
                        warn!(
                            resource = %record.resource_id,
                            holder = %record.holder_agent_id,
                            "reclaimed expired lock"
                        );
                        reclaimed.push(record);
                    }
                }
                ReadState::Corrupt if entry.modified + self.default_ttl <= now => {
                    warn!(path = %entry.path.display(), "removing stale unparsable lock file");
                    self.store.remove_path(&entry.path, "<corrupt>")?;
                }
                _ => {}
            }
        }
        Ok(reclaimed)
    }

    /// Forced release of every lock held by one agent, bypassing the
    /// holder check. Emergency-controller use only: a quarantined agent
    /// is no longer trusted to have released cleanly.
    pub fn release_all_for(&self, agent_id: &str) -> Result<Vec<String>, LockError> {
        let mut released = Vec::new();
        for entry in self.store.scan()? {
            if let ReadState::Held(record) = entry.state {
                if record.holder_agent_id == agent_id {
                    self.store.remove(&record.resource_id)?;
                    released.push(record.resource_id);
                }
            }
        }
        Ok(released)
    }

    /// Drop every lock in the store. ShutdownAll cleanup.
    pub fn release_everything(&self) -> Result<usize, LockError> {
        let mut count = 0;
        for entry in self.store.scan()? {
            self.store.remove_path(&entry.path, "<all>")?;
            count += 1;
        }
        Ok(count)
    }

    /// Read-only view of the lock table. The only sanctioned way to look
    /// at the store's contents from outside the manager.
    pub fn inspect(&self) -> Result<Vec<LockRecord>, LockError> {
        let mut records: Vec<LockRecord> = self
            .store
            .scan()?
            .into_iter()
            .filter_map(|entry| match entry.state {
                ReadState::Held(record) => Some(record),
                _ => None,
            })
            .collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &std::path::Path) -> LockManager {
        LockManager::open(dir, 30).unwrap()
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        m.acquire_default("config.json", "agent-00").unwrap();
        let err = m.acquire_default("config.json", "agent-01").unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_release_requires_matching_token() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let token = m.acquire_default("config.json", "agent-00").unwrap();
        let stranger = Uuid::new_v4();
        assert!(matches!(
            m.release("config.json", &stranger),
            Err(LockError::NotHolder { .. })
        ));
        m.release("config.json", &token).unwrap();
        // Released: next acquire succeeds.
        m.acquire_default("config.json", "agent-01").unwrap();
    }

    #[test]
    fn test_expired_lock_can_be_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        m.acquire("schema.sql", "agent-00", Duration::seconds(-1))
            .unwrap();
        // Dead on arrival; a new acquirer takes over without reclaim
        // running first.
        m.acquire_default("schema.sql", "agent-01").unwrap();
    }

    #[test]
    fn test_reclaim_expired_returns_record() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        m.acquire("schema.sql", "agent-00", Duration::seconds(-1))
            .unwrap();
        m.acquire_default("config.json", "agent-01").unwrap();

        let reclaimed = m.reclaim_expired().unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].resource_id, "schema.sql");
        assert_eq!(reclaimed[0].holder_agent_id, "agent-00");

        // Live lock untouched, expired one gone.
        let table = m.inspect().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].resource_id, "config.json");
    }

    #[test]
    fn test_stale_token_after_takeover_is_not_holder() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let stale = m
            .acquire("schema.sql", "agent-00", Duration::seconds(-1))
            .unwrap();
        m.reclaim_expired().unwrap();
        let fresh = m.acquire_default("schema.sql", "agent-01").unwrap();

        // The crashed holder coming back to life cannot release the new
        // holder's lock.
        assert!(matches!(
            m.release("schema.sql", &stale),
            Err(LockError::NotHolder { .. })
        ));
        m.release("schema.sql", &fresh).unwrap();
    }

    #[test]
    fn test_renew_extends_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let token = m.acquire("config.json", "agent-00", Duration::seconds(2)).unwrap();
        m.renew("config.json", &token, Duration::seconds(120)).unwrap();

        let table = m.inspect().unwrap();
        assert!(table[0].expires_at > Utc::now() + Duration::seconds(60));
    }

    #[test]
    fn test_renew_after_expiry_refused() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let token = m
            .acquire("config.json", "agent-00", Duration::seconds(-1))
            .unwrap();
        assert!(matches!(
            m.renew("config.json", &token, Duration::seconds(30)),
            Err(LockError::Expired { .. })
        ));
    }

    #[test]
    fn test_release_all_for_agent() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        m.acquire_default("a", "agent-00").unwrap();
        m.acquire_default("b", "agent-00").unwrap();
        m.acquire_default("c", "agent-01").unwrap();

        let mut released = m.release_all_for("agent-00").unwrap();
        released.sort();
        assert_eq!(released, vec!["a".to_string(), "b".to_string()]);

        let table = m.inspect().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].holder_agent_id, "agent-01");
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        // Independent managers simulate independent processes sharing
        // only the lock directory.
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let m = LockManager::open(&path, 30).unwrap();
                    m.acquire_default("config.json", &format!("agent-{i:02}"))
                        .is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
