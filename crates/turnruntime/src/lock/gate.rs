use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{sleep_until, timeout_at, Instant};
use turncore::{EventBus, ExecutionEvent, LockError};

use super::store::{LockRecord, LockStore};
use crate::config::GateConfig;

/// How many insert/reclaim attempts one acquisition round makes before
/// falling back to polling.
const MAX_IMMEDIATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExclusiveOptions {
    /// The caller already inserted the lock row; skip acquisition but still
    /// release when the work settles.
    pub already_locked: bool,
}

/// Runs units of work one at a time per logical key.
///
/// Exclusion across processes comes from the [`LockStore`]; waiters inside
/// one process additionally queue on a per-key async mutex so they are
/// served in arrival order instead of racing each other's poll timers.
#[derive(Clone)]
pub struct TurnGate {
    store: Arc<dyn LockStore>,
    config: GateConfig,
    events: Option<EventBus>,
    queues: Arc<TurnQueues>,
}

impl TurnGate {
    pub fn new(store: Arc<dyn LockStore>, config: GateConfig) -> Self {
        Self {
            store,
            config,
            events: None,
            queues: Arc::new(TurnQueues::default()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Run `work` while holding the lock for `key`.
    pub async fn run_exclusive<T, E, Fut>(&self, key: &str, work: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.run_exclusive_with(key, ExclusiveOptions::default(), work)
            .await
    }

    pub async fn run_exclusive_with<T, E, Fut>(
        &self,
        key: &str,
        options: ExclusiveOptions,
        work: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = if options.already_locked {
            self.adopt(key)
        } else {
            self.acquire(key).await?
        };

        let result = match self.config.heartbeat() {
            Some(interval) => guard.keep_alive(interval, work).await,
            None => work.await,
        };

        guard.release();
        result
    }

    /// Wait until the lock for `key` is held, or fail with
    /// [`LockError::Timeout`] once the configured wait elapses.
    pub async fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let started = Instant::now();
        let deadline = started + self.config.wait_timeout();

        let queue = self.queues.queue(key);
        let permit = match timeout_at(deadline, queue.lock_owned()).await {
            Ok(permit) => permit,
            Err(_) => {
                self.queues.prune(key);
                return Err(timeout_error(key, started));
            }
        };
        let local = LocalTurn {
            key: key.to_string(),
            permit: Some(permit),
            queues: self.queues.clone(),
        };

        loop {
            if let Some(record) = self.claim(key)? {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(key = %key, waited_ms, "Turn lock acquired");
                self.emit(ExecutionEvent::LockAcquired {
                    key: key.to_string(),
                    waited_ms,
                    timestamp: Utc::now(),
                });
                return Ok(LockGuard::new(key, self, Some(record.created_at), Some(local)));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(key = %key, "Gave up waiting for turn lock");
                return Err(timeout_error(key, started));
            }

            tracing::trace!(key = %key, "Turn lock busy, polling");
            sleep_until((now + self.config.poll_interval()).min(deadline)).await;
        }
    }

    /// Make one acquisition attempt without waiting: insert the row, or
    /// reclaim a stale one and insert in its place.
    pub fn try_acquire(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.claim(key)?.is_some())
    }

    /// Like [`TurnGate::try_acquire`], returning the inserted row.
    fn claim(&self, key: &str) -> Result<Option<LockRecord>, LockError> {
        for _ in 0..MAX_IMMEDIATE_ATTEMPTS {
            let existing = match self.store.get(key)? {
                Some(row) => row,
                None => {
                    let record = LockRecord::new(key);
                    if self.store.try_insert(&record)? {
                        return Ok(Some(record));
                    }
                    // Lost the insert race; look at the winner's row.
                    continue;
                }
            };

            let age = existing.age(Utc::now());
            if age <= self.config.stale_after() {
                return Ok(None);
            }

            tracing::warn!(
                key = %key,
                age_ms = age.as_millis() as u64,
                "Reclaiming stale turn lock"
            );
            self.store.evict(key, existing.started_at)?;
        }
        Ok(None)
    }

    /// Take responsibility for releasing a row the caller inserted itself.
    pub fn adopt(&self, key: &str) -> LockGuard {
        let created_at = match self.store.get(key) {
            Ok(row) => row.map(|r| r.created_at),
            Err(e) => {
                tracing::warn!(key = %key, "Failed to read adopted turn lock: {}", e);
                None
            }
        };
        LockGuard::new(key, self, created_at, None)
    }

    /// Force-remove the row for `key`, whoever holds it.
    pub fn force_release(&self, key: &str) -> Result<bool, LockError> {
        self.store.release(key)
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

fn timeout_error(key: &str, started: Instant) -> LockError {
    LockError::Timeout {
        key: key.to_string(),
        waited_ms: started.elapsed().as_millis() as u64,
    }
}

/// A held turn lock. The row is deleted when the guard is released or
/// dropped, including during unwinding and when the owning future is
/// cancelled.
pub struct LockGuard {
    key: String,
    store: Arc<dyn LockStore>,
    events: Option<EventBus>,
    // `created_at` of the row this guard owns; heartbeats only touch that row.
    created_at: Option<DateTime<Utc>>,
    released: bool,
    // Dropped after `Drop::drop` has deleted the row, so the next local
    // waiter never sees it.
    _local: Option<LocalTurn>,
}

impl LockGuard {
    fn new(
        key: &str,
        gate: &TurnGate,
        created_at: Option<DateTime<Utc>>,
        local: Option<LocalTurn>,
    ) -> Self {
        Self {
            key: key.to_string(),
            store: gate.store.clone(),
            events: gate.events.clone(),
            created_at,
            released: false,
            _local: local,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) {
        self.release_row();
    }

    async fn keep_alive<F: Future>(&self, interval: Duration, work: F) -> F::Output {
        tokio::pin!(work);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                biased;
                output = &mut work => return output,
                _ = ticker.tick() => self.renew(),
            }
        }
    }

    fn renew(&self) {
        let Some(created_at) = self.created_at else {
            tracing::warn!(key = %self.key, "No owned turn lock row to renew");
            return;
        };
        match self
            .store
            .renew(&self.key, created_at, Utc::now().trunc_subsecs(6))
        {
            Ok(true) => tracing::trace!(key = %self.key, "Turn lock renewed"),
            Ok(false) => tracing::warn!(key = %self.key, "Turn lock row was reclaimed while held"),
            Err(e) => tracing::warn!(key = %self.key, "Failed to renew turn lock: {}", e),
        }
    }

    fn release_row(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.store.release(&self.key) {
            tracing::warn!(key = %self.key, "Failed to release turn lock: {}", e);
        }
        tracing::debug!(key = %self.key, "Turn lock released");
        if let Some(events) = &self.events {
            events.emit(ExecutionEvent::LockReleased {
                key: self.key.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_row();
    }
}

/// Per-key FIFO queues of in-process waiters.
#[derive(Default)]
struct TurnQueues {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TurnQueues {
    fn queue(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut queues = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(key.to_string()).or_default().clone()
    }

    /// Drop the queue for `key` once nobody holds or waits on it.
    fn prune(&self, key: &str) {
        let mut queues = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if queues.get(key).is_some_and(|q| Arc::strong_count(q) == 1) {
            queues.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct LocalTurn {
    key: String,
    permit: Option<OwnedMutexGuard<()>>,
    queues: Arc<TurnQueues>,
}

impl Drop for LocalTurn {
    fn drop(&mut self) {
        self.permit.take();
        self.queues.prune(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockStore;

    #[tokio::test]
    async fn queues_are_pruned_after_release() {
        let gate = TurnGate::new(Arc::new(MemoryLockStore::new()), GateConfig::default());

        let result: Result<u32, LockError> = gate.run_exclusive("conv-1", async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(gate.queues.len(), 0);
        assert!(gate.store.get("conv-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn try_acquire_does_not_wait() {
        let gate = TurnGate::new(Arc::new(MemoryLockStore::new()), GateConfig::default());

        assert!(gate.try_acquire("conv-1").unwrap());
        assert!(!gate.try_acquire("conv-1").unwrap());

        gate.adopt("conv-1").release();
        assert!(gate.try_acquire("conv-1").unwrap());
    }
}
