use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use turncore::LockError;

/// One active turn lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LockRecord {
    /// A record starting now. Timestamps are truncated to microseconds so
    /// they survive a round trip through any store unchanged.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            key: key.into(),
            started_at: now,
            created_at: now,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }
}

/// Durable table of active turn locks.
///
/// Uniqueness on `key` must be enforced by the store itself: `try_insert`
/// is the only mutual-exclusion primitive the gate relies on.
pub trait LockStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<LockRecord>, LockError>;

    /// Insert `record`, returning `false` when a row for the key already exists.
    fn try_insert(&self, record: &LockRecord) -> Result<bool, LockError>;

    /// Delete the row for `key` only if it still carries `started_at`.
    fn evict(&self, key: &str, started_at: DateTime<Utc>) -> Result<bool, LockError>;

    /// Delete the row for `key` unconditionally.
    fn release(&self, key: &str) -> Result<bool, LockError>;

    /// Move `started_at` forward on the row created at `created_at`.
    /// `false` if that row is gone or was replaced by another holder.
    fn renew(
        &self,
        key: &str,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, LockError>;

    fn list(&self) -> Result<Vec<LockRecord>, LockError>;
}

/// Lock table kept in process memory. Only excludes callers sharing the
/// same instance.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    rows: Mutex<HashMap<String, LockRecord>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LockRecord>>, LockError> {
        self.rows.lock().map_err(|e| LockError::Store(e.to_string()))
    }
}

impl LockStore for MemoryLockStore {
    fn get(&self, key: &str) -> Result<Option<LockRecord>, LockError> {
        Ok(self.rows()?.get(key).cloned())
    }

    fn try_insert(&self, record: &LockRecord) -> Result<bool, LockError> {
        let mut rows = self.rows()?;
        if rows.contains_key(&record.key) {
            return Ok(false);
        }
        rows.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    fn evict(&self, key: &str, started_at: DateTime<Utc>) -> Result<bool, LockError> {
        let mut rows = self.rows()?;
        match rows.get(key) {
            Some(row) if row.started_at == started_at => {
                rows.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.rows()?.remove(key).is_some())
    }

    fn renew(
        &self,
        key: &str,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        match self.rows()?.get_mut(key) {
            Some(row) if row.created_at == created_at => {
                row.started_at = started_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<LockRecord>, LockError> {
        let mut records: Vec<_> = self.rows()?.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn insert_is_unique_per_key() {
        let store = MemoryLockStore::new();
        assert!(store.try_insert(&LockRecord::new("conv-1")).unwrap());
        assert!(!store.try_insert(&LockRecord::new("conv-1")).unwrap());
        assert!(store.try_insert(&LockRecord::new("conv-2")).unwrap());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn evict_only_matches_observed_row() {
        let store = MemoryLockStore::new();
        let mut old = LockRecord::new("conv-1");
        old.started_at -= ChronoDuration::minutes(10);
        store.try_insert(&old).unwrap();

        assert!(!store.evict("conv-1", Utc::now()).unwrap());
        assert!(store.evict("conv-1", old.started_at).unwrap());
        assert!(store.get("conv-1").unwrap().is_none());
    }

    #[test]
    fn renew_only_touches_own_row() {
        let store = MemoryLockStore::new();
        let mut replaced = LockRecord::new("conv-1");
        replaced.created_at -= ChronoDuration::minutes(10);
        let current = LockRecord::new("conv-1");
        store.try_insert(&current).unwrap();

        let later = current.started_at + ChronoDuration::seconds(5);
        assert!(!store.renew("conv-1", replaced.created_at, later).unwrap());
        assert_eq!(store.get("conv-1").unwrap(), Some(current.clone()));

        assert!(store.renew("conv-1", current.created_at, later).unwrap());
        assert_eq!(store.get("conv-1").unwrap().unwrap().started_at, later);
    }

    #[test]
    fn staleness_uses_started_at() {
        let mut record = LockRecord::new("conv-1");
        let threshold = Duration::from_secs(300);
        assert!(!record.is_stale(Utc::now(), threshold));

        record.started_at -= ChronoDuration::minutes(6);
        assert!(record.is_stale(Utc::now(), threshold));
    }
}
