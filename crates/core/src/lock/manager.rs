// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed lock manager
//!
//! Grants short-lived, renewable leases on named resources. Every
//! check-then-act step goes through a store transaction; the in-process map of
//! held locks is bookkeeping for renewal and release only.

use super::config::LockConfig;
use super::error::LockError;
use super::table::{self, Lock, LockId, LockQueue, LockTable, QueueEntry};
use crate::clock::{millis, Clock, SystemClock};
use crate::config::ConfigError;
use crate::id::{IdGen, UuidIdGen};
use crate::metrics::{self, MetricsSink, TracingMetrics};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tether_store::{join_path, CoordinationStore, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

pub(crate) const LOCKS_ROOT: &str = "locks";
pub(crate) const QUEUES_ROOT: &str = "lock_queues";

/// Result of an acquisition attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(Lock),
    /// The deadline passed without a grant
    TimedOut { resource: String, waited: Duration },
}

impl AcquireOutcome {
    pub fn granted(self) -> Option<Lock> {
        match self {
            Self::Granted(lock) => Some(lock),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Result of releasing a lock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lock was held locally but its stored entry was already gone
    Expired,
    /// The id is not held by this manager
    Unknown,
}

/// Result of renewing a lock
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed(Lock),
    /// The entry is gone or owned by someone else; exclusivity is lost
    Lost,
}

/// A lock held by this process
struct HeldLock {
    lock: Lock,
    renewal: Option<JoinHandle<()>>,
    /// Flips to `false` once the lock is released or found lost
    status: watch::Sender<bool>,
}

pub(crate) struct Inner<S, C, G> {
    pub(crate) store: S,
    pub(crate) clock: C,
    ids: G,
    pub(crate) config: LockConfig,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    held: Mutex<HashMap<LockId, HeldLock>>,
}

impl<S, C, G> Drop for Inner<S, C, G> {
    fn drop(&mut self) {
        let held = self.held.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, lock) in held.drain() {
            if let Some(task) = lock.renewal {
                task.abort();
            }
        }
    }
}

/// What a single pass of the acquisition loop observed
enum Attempt {
    Granted(Lock),
    /// Fairness is on and other attempts are ahead of us
    Queued { position: usize },
    /// The resource is at its concurrency limit
    Busy { active: usize },
    /// Another attempt won the transaction
    LostRace,
}

/// Lease-based lock manager over a coordination store
///
/// Cheap to clone; clones share bookkeeping and background tasks.
pub struct LockManager<S, C = SystemClock, G = UuidIdGen> {
    pub(crate) inner: Arc<Inner<S, C, G>>,
}

impl<S, C, G> Clone for LockManager<S, C, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CoordinationStore> LockManager<S> {
    pub fn new(store: S, config: LockConfig) -> Result<Self, ConfigError> {
        Self::with_parts(
            store,
            config,
            SystemClock,
            UuidIdGen::default(),
            Arc::new(TracingMetrics),
        )
    }
}

impl<S, C, G> LockManager<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    pub fn with_parts(
        store: S,
        config: LockConfig,
        clock: C,
        ids: G,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                clock,
                ids,
                config,
                metrics,
                held: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Acquire a lease on `resource`, retrying until the acquire timeout
    ///
    /// Store errors are retried within the same deadline; if the final pass
    /// still failed on the store, the error is returned instead of a timeout.
    pub async fn acquire(
        &self,
        resource: &str,
        owner: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<AcquireOutcome, LockError> {
        let id = LockId::new(self.inner.ids.next());
        let span = tracing::info_span!("lock.acquire", resource, owner, lock_id = %id);
        self.acquire_with_id(resource, owner, id, metadata)
            .instrument(span)
            .await
    }

    async fn acquire_with_id(
        &self,
        resource: &str,
        owner: &str,
        id: LockId,
        metadata: BTreeMap<String, String>,
    ) -> Result<AcquireOutcome, LockError> {
        let config = &self.inner.config;
        let started = Instant::now();
        let deadline = started + config.acquire_timeout;
        let queue_deadline = self
            .inner
            .clock
            .now_millis()
            .saturating_add(millis(config.acquire_timeout));

        let mut pending = PendingAcquire::new(self.clone(), resource, id.clone());
        let mut last_error: Option<StoreError> = None;

        loop {
            match self
                .attempt(resource, owner, &id, &metadata, &mut pending.queued, queue_deadline)
                .await
            {
                Ok(Attempt::Granted(lock)) => {
                    // Tracked before the next await so a dropped future cannot orphan it
                    pending.granted = true;
                    self.track(lock.clone());
                    pending.settle().await;
                    self.inner.metrics.increment(metrics::LOCK_ACQUIRED, resource);
                    tracing::info!(
                        expires_at = lock.expires_at,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lock granted"
                    );
                    return Ok(AcquireOutcome::Granted(lock));
                }
                Ok(Attempt::Queued { position }) => {
                    last_error = None;
                    tracing::debug!(position, "waiting in fairness queue");
                }
                Ok(Attempt::Busy { active }) => {
                    last_error = None;
                    tracing::debug!(active, "resource at capacity");
                }
                Ok(Attempt::LostRace) => {
                    last_error = None;
                    tracing::debug!("lost acquisition race");
                }
                Err(AttemptError::Store(e)) => {
                    tracing::warn!(error = %e, "store error during acquisition, retrying");
                    last_error = Some(e);
                }
                Err(AttemptError::Corrupt { path, source }) => {
                    pending.settle().await;
                    self.inner.metrics.increment(metrics::LOCK_FAILED, resource);
                    tracing::error!(path, error = %source, "corrupt lock data");
                    return Err(LockError::corrupt(&path, source));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(config.retry_interval.min(deadline - now)).await;
        }

        pending.settle().await;
        self.inner.metrics.increment(metrics::LOCK_FAILED, resource);
        let waited = started.elapsed();

        match last_error {
            Some(e) => {
                tracing::error!(error = %e, "lock acquisition failed on store errors");
                Err(LockError::coordination(resource, e))
            }
            None => {
                tracing::info!(waited_ms = waited.as_millis() as u64, "lock acquisition timed out");
                Ok(AcquireOutcome::TimedOut {
                    resource: resource.to_string(),
                    waited,
                })
            }
        }
    }

    /// One pass of the acquisition protocol
    async fn attempt(
        &self,
        resource: &str,
        owner: &str,
        id: &LockId,
        metadata: &BTreeMap<String, String>,
        queued: &mut bool,
        queue_deadline: u64,
    ) -> Result<Attempt, AttemptError> {
        let inner = &self.inner;
        let store = &inner.store;

        if inner.config.fairness_enabled {
            let path = queue_path(resource);
            if !*queued {
                let now = inner.clock.now_millis();
                let entry = QueueEntry {
                    id: id.clone(),
                    owner: owner.to_string(),
                    enqueued_at: now,
                    deadline: queue_deadline,
                };
                store
                    .transact(&path, &|current| table::enqueue(current, &entry, now))
                    .await?;
                *queued = true;
            }

            let now = inner.clock.now_millis();
            let outcome = store
                .transact(&path, &|current| table::tidy_queue(current, now))
                .await?;
            let queue = LockQueue::from_value(outcome.snapshot.as_ref())
                .map_err(|source| AttemptError::Corrupt { path, source })?;
            match queue.position(id) {
                Some(0) => {}
                Some(position) => return Ok(Attempt::Queued { position }),
                None => {
                    // Pruned or lost by another writer; join again at the tail
                    *queued = false;
                    return Ok(Attempt::Queued {
                        position: queue.len(),
                    });
                }
            }
        }

        let path = lock_path(resource);
        let max = inner.config.max_concurrent_locks;
        let now = inner.clock.now_millis();

        let current = store.get(&path).await?;
        let active = LockTable::from_value(current.as_ref())
            .map_err(|source| AttemptError::Corrupt {
                path: path.clone(),
                source,
            })?
            .active_count(now);
        if active >= max {
            return Ok(Attempt::Busy { active });
        }

        let lock = Lock {
            id: id.clone(),
            resource: resource.to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now.saturating_add(millis(inner.config.ttl)),
            renew_count: 0,
            metadata: metadata.clone(),
        };
        let outcome = store
            .transact(&path, &|current| table::admit(current, &lock, max, now))
            .await?;
        if outcome.committed {
            return Ok(Attempt::Granted(lock));
        }

        // An aborted admit means either a full resource or undecodable data
        LockTable::from_value(outcome.snapshot.as_ref())
            .map_err(|source| AttemptError::Corrupt { path, source })?;
        Ok(Attempt::LostRace)
    }

    /// Best-effort removal from the fairness queue
    async fn leave_queue(&self, resource: &str, id: &LockId) {
        let now = self.inner.clock.now_millis();
        let result = self
            .inner
            .store
            .transact(&queue_path(resource), &|current| {
                table::dequeue(current, id, now)
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(
                resource,
                lock_id = %id,
                error = %e,
                "failed to leave fairness queue; entry lapses at its deadline"
            );
        }
    }

    /// Record a granted lock locally and start its renewal task
    fn track(&self, lock: Lock) {
        let renewal = self
            .inner
            .config
            .auto_renew
            .then(|| self.spawn_renewal(lock.id.clone()));
        let (status, _) = watch::channel(true);
        let mut held = self.held();
        held.insert(
            lock.id.clone(),
            HeldLock {
                lock,
                renewal,
                status,
            },
        );
    }

    fn spawn_renewal(&self, id: LockId) -> JoinHandle<()> {
        let weak: Weak<Inner<S, C, G>> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.renew_interval;
        let span = tracing::debug_span!("lock.renewal", lock_id = %id);

        tokio::spawn(
            async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    let manager = LockManager { inner };
                    match manager.renew(&id).await {
                        Ok(RenewOutcome::Renewed(_)) => {}
                        Ok(RenewOutcome::Lost) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "renewal failed, retrying next interval")
                        }
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Extend a held lock's lease by `ttl` from now
    pub async fn renew(&self, id: &LockId) -> Result<RenewOutcome, LockError> {
        let Some(held) = self.held_lock(id) else {
            tracing::warn!(
                lock_id = %id,
                "renewal requested for a lock this manager does not hold"
            );
            return Ok(RenewOutcome::Lost);
        };

        let inner = &self.inner;
        let path = lock_path(&held.resource);
        let now = inner.clock.now_millis();
        let ttl = millis(inner.config.ttl);

        let outcome = inner
            .store
            .transact(&path, &|current| {
                table::extend(current, id, &held.owner, ttl, now)
            })
            .await
            .map_err(|e| LockError::coordination(&held.resource, e))?;

        if !outcome.committed {
            tracing::warn!(
                resource = %held.resource,
                lock_id = %id,
                "lock lost: entry missing or owned by someone else"
            );
            self.forget(id);
            inner.metrics.increment(metrics::LOCK_EXPIRED, &held.resource);
            return Ok(RenewOutcome::Lost);
        }

        let renewed = LockTable::from_value(outcome.snapshot.as_ref())
            .map_err(|e| LockError::corrupt(&path, e))?
            .get(id)
            .cloned()
            .unwrap_or_else(|| Lock {
                expires_at: now.saturating_add(ttl),
                renew_count: held.renew_count.saturating_add(1),
                ..held.clone()
            });

        if let Some(entry) = self.held().get_mut(id) {
            entry.lock = renewed.clone();
        }
        inner.metrics.increment(metrics::LOCK_RENEWED, &held.resource);
        tracing::debug!(
            resource = %held.resource,
            lock_id = %id,
            expires_at = renewed.expires_at,
            renew_count = renewed.renew_count,
            "lock renewed"
        );
        Ok(RenewOutcome::Renewed(renewed))
    }

    /// Release a held lock
    ///
    /// The renewal task is cancelled and local bookkeeping dropped before the
    /// store is touched, so a failed delete leaves a lease that simply lapses
    /// at its deadline.
    pub async fn release(&self, id: &LockId) -> Result<ReleaseOutcome, LockError> {
        let Some(lock) = self.forget(id) else {
            tracing::warn!(lock_id = %id, "release of unknown lock");
            return Ok(ReleaseOutcome::Unknown);
        };

        let outcome = self
            .inner
            .store
            .transact(&lock_path(&lock.resource), &|current| {
                table::remove(current, id, &lock.owner)
            })
            .await
            .map_err(|e| LockError::coordination(&lock.resource, e))?;

        if outcome.committed {
            self.inner
                .metrics
                .increment(metrics::LOCK_RELEASED, &lock.resource);
            tracing::info!(resource = %lock.resource, lock_id = %id, "lock released");
            Ok(ReleaseOutcome::Released)
        } else {
            self.inner
                .metrics
                .increment(metrics::LOCK_EXPIRED, &lock.resource);
            tracing::warn!(
                resource = %lock.resource,
                lock_id = %id,
                "lock had already expired before release"
            );
            Ok(ReleaseOutcome::Expired)
        }
    }

    /// Acquire a lock wrapped in a guard that releases it when dropped
    pub async fn acquire_guard(
        &self,
        resource: &str,
        owner: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<LockGuard<S, C, G>, LockError> {
        match self.acquire(resource, owner, metadata).await? {
            AcquireOutcome::Granted(lock) => Ok(LockGuard {
                status: self.subscribe(&lock.id),
                manager: Some(self.clone()),
                lock,
            }),
            AcquireOutcome::TimedOut { resource, waited } => {
                Err(LockError::AcquireTimeout { resource, waited })
            }
        }
    }

    /// Run `f` while holding a lock on `resource`
    ///
    /// The lock is released on every exit path: normal return, a panic in
    /// `f`, or the returned future being dropped before completion. If the
    /// lease lapsed or was lost while `f` ran, its output is discarded and
    /// [`LockError::LeaseLost`] is returned, since another owner may have
    /// overlapped with the work.
    pub async fn execute_with_lock<F, Fut, T>(
        &self,
        resource: &str,
        owner: &str,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(Lock) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire_guard(resource, owner, BTreeMap::new()).await?;
        let lock = guard.lock().clone();
        let output = f(lock.clone()).await;
        match guard.release().await {
            Ok(ReleaseOutcome::Released) => Ok(output),
            Ok(outcome) => {
                tracing::warn!(
                    resource,
                    lock_id = %lock.id,
                    ?outcome,
                    "lease lost during scoped work"
                );
                Err(LockError::LeaseLost {
                    resource: resource.to_string(),
                    lock_id: lock.id,
                })
            }
            Err(e) => {
                // Store unreachable; the lease lapses at its deadline
                tracing::warn!(resource, error = %e, "release after scoped work failed");
                Ok(output)
            }
        }
    }

    /// Unexpired locks currently stored for `resource`
    pub async fn active_locks(&self, resource: &str) -> Result<Vec<Lock>, LockError> {
        let path = lock_path(resource);
        let current = self
            .inner
            .store
            .get(&path)
            .await
            .map_err(|e| LockError::coordination(resource, e))?;
        let now = self.inner.clock.now_millis();
        Ok(LockTable::from_value(current.as_ref())
            .map_err(|e| LockError::corrupt(&path, e))?
            .active(now)
            .cloned()
            .collect())
    }

    pub async fn is_locked(&self, resource: &str) -> Result<bool, LockError> {
        Ok(!self.active_locks(resource).await?.is_empty())
    }

    /// Snapshot of the locks this manager holds
    pub fn held_locks(&self) -> Vec<Lock> {
        let mut locks: Vec<Lock> = self.held().values().map(|h| h.lock.clone()).collect();
        locks.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then(a.id.cmp(&b.id)));
        locks
    }

    /// Release every held lock and stop all renewal tasks
    pub async fn shutdown(&self) {
        let ids: Vec<LockId> = self.held().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.release(&id).await {
                tracing::warn!(lock_id = %id, error = %e, "release during shutdown failed");
            }
        }
    }

    fn held(&self) -> std::sync::MutexGuard<'_, HashMap<LockId, HeldLock>> {
        self.inner.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn held_lock(&self, id: &LockId) -> Option<Lock> {
        self.held().get(id).map(|h| h.lock.clone())
    }

    /// Watch whether `id` is still held; already `false` if it is not
    fn subscribe(&self, id: &LockId) -> watch::Receiver<bool> {
        match self.held().get(id) {
            Some(held) => held.status.subscribe(),
            None => watch::channel(false).1,
        }
    }

    /// Drop local bookkeeping for `id` and cancel its renewal task
    pub(crate) fn forget(&self, id: &LockId) -> Option<Lock> {
        let held = self.held().remove(id)?;
        if let Some(task) = held.renewal {
            task.abort();
        }
        held.status.send_replace(false);
        Some(held.lock)
    }
}

enum AttemptError {
    Store(StoreError),
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
}

impl From<StoreError> for AttemptError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

pub(crate) fn lock_path(resource: &str) -> String {
    join_path(&[LOCKS_ROOT, resource])
}

pub(crate) fn queue_path(resource: &str) -> String {
    join_path(&[QUEUES_ROOT, resource])
}

/// Cleans up after an acquisition whose future is dropped midway
///
/// Leaves the fairness queue and releases a lock that was granted but not
/// yet handed to the caller.
struct PendingAcquire<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    manager: LockManager<S, C, G>,
    resource: String,
    id: LockId,
    queued: bool,
    granted: bool,
}

impl<S, C, G> PendingAcquire<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    fn new(manager: LockManager<S, C, G>, resource: &str, id: LockId) -> Self {
        Self {
            manager,
            resource: resource.to_string(),
            id,
            queued: false,
            granted: false,
        }
    }

    /// Leave the queue if still in it, then disarm
    async fn settle(&mut self) {
        if self.queued {
            self.manager.leave_queue(&self.resource, &self.id).await;
            self.queued = false;
        }
        self.granted = false;
    }
}

impl<S, C, G> Drop for PendingAcquire<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    fn drop(&mut self) {
        if !self.queued && !self.granted {
            return;
        }
        let manager = self.manager.clone();
        let resource = std::mem::take(&mut self.resource);
        let id = self.id.clone();
        let (queued, granted) = (self.queued, self.granted);
        tracing::debug!(resource = %resource, lock_id = %id, granted, "acquisition abandoned");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if granted {
                        if let Err(e) = manager.release(&id).await {
                            tracing::warn!(
                                lock_id = %id,
                                error = %e,
                                "abandoned grant not released"
                            );
                        }
                    }
                    if queued {
                        manager.leave_queue(&resource, &id).await;
                    }
                });
            }
            Err(_) => {
                if granted {
                    manager.forget(&id);
                }
            }
        }
    }
}

/// A granted lock released when the guard goes away
///
/// Prefer [`LockGuard::release`], which reports the outcome. Dropping the
/// guard schedules the release on the current runtime instead.
pub struct LockGuard<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    manager: Option<LockManager<S, C, G>>,
    lock: Lock,
    status: watch::Receiver<bool>,
}

impl<S, C, G> LockGuard<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Whether this manager still holds the lock and its lease has not lapsed
    ///
    /// Work that needs exclusivity should check this before committing side
    /// effects.
    pub fn is_held(&self) -> bool {
        let Some(manager) = &self.manager else {
            return false;
        };
        let now = manager.inner.clock.now_millis();
        manager
            .held_lock(&self.lock.id)
            .is_some_and(|lock| !lock.is_expired(now))
    }

    /// Resolves once the lock is released or a renewal or sweep finds it lost
    pub async fn lost(&mut self) {
        // A closed channel means the manager itself is gone
        let _ = self.status.wait_for(|held| !*held).await;
    }

    pub async fn release(mut self) -> Result<ReleaseOutcome, LockError> {
        match self.manager.take() {
            Some(manager) => manager.release(&self.lock.id).await,
            None => Ok(ReleaseOutcome::Unknown),
        }
    }
}

impl<S, C, G> Drop for LockGuard<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        let id = self.lock.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = manager.release(&id).await {
                        tracing::warn!(lock_id = %id, error = %e, "deferred release failed");
                    }
                });
            }
            Err(_) => {
                // No runtime to reach the store; stop renewing so the lease lapses
                manager.forget(&id);
                tracing::warn!(lock_id = %id, "lock guard dropped outside a runtime");
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
