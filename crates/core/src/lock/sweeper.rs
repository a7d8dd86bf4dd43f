// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic removal of expired locks and abandoned queue entries
//!
//! Expiry is enforced on every read regardless; the sweeper only keeps the
//! store tidy and drops local bookkeeping for leases that lapsed.

use super::config::SweepConfig;
use super::error::LockError;
use super::manager::{Inner, LockManager, LOCKS_ROOT, QUEUES_ROOT};
use super::table::{self, LockQueue, LockTable};
use crate::clock::Clock;
use crate::id::IdGen;
use crate::metrics;
use std::sync::{Arc, Weak};
use tether_store::CoordinationStore;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// What one sweep removed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resources_scanned: usize,
    pub locks_removed: usize,
    pub queue_entries_removed: usize,
}

/// Handle to a running sweeper; the task stops when this is dropped
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to wind down
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<S, C, G> LockManager<S, C, G>
where
    S: CoordinationStore,
    C: Clock,
    G: IdGen,
{
    /// Remove every expired lock and abandoned queue entry in the store
    ///
    /// A resource that fails to decode or whose transaction errors is logged
    /// and skipped; only a failure to list the roots is returned.
    pub async fn sweep_expired(&self) -> Result<SweepReport, LockError> {
        let mut report = SweepReport::default();
        let store = &self.inner.store;

        let paths = store
            .list(LOCKS_ROOT)
            .await
            .map_err(|e| LockError::coordination(LOCKS_ROOT, e))?;
        for path in paths {
            report.resources_scanned += 1;
            match self.sweep_locks(&path).await {
                Ok(removed) => report.locks_removed += removed,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "skipping resource during sweep")
                }
            }
        }

        let queues = store
            .list(QUEUES_ROOT)
            .await
            .map_err(|e| LockError::coordination(QUEUES_ROOT, e))?;
        for path in queues {
            match self.sweep_queue(&path).await {
                Ok(removed) => report.queue_entries_removed += removed,
                Err(e) => tracing::warn!(path = %path, error = %e, "skipping queue during sweep"),
            }
        }

        if report.locks_removed > 0 || report.queue_entries_removed > 0 {
            tracing::info!(
                resources = report.resources_scanned,
                locks_removed = report.locks_removed,
                queue_entries_removed = report.queue_entries_removed,
                "swept expired locks"
            );
        } else {
            tracing::debug!(resources = report.resources_scanned, "sweep found nothing expired");
        }
        Ok(report)
    }

    async fn sweep_locks(&self, path: &str) -> Result<usize, LockError> {
        let inner = &self.inner;
        let now = inner.clock.now_millis();

        let current = inner
            .store
            .get(path)
            .await
            .map_err(|e| LockError::coordination(path, e))?;
        let mut before = LockTable::from_value(current.as_ref())
            .map_err(|e| LockError::corrupt(path, e))?;
        let expired = before.prune_expired(now);
        if expired.is_empty() {
            return Ok(0);
        }

        let outcome = inner
            .store
            .transact(path, &|current| table::sweep(current, now))
            .await
            .map_err(|e| LockError::coordination(path, e))?;
        if !outcome.committed {
            return Ok(0);
        }

        let after = LockTable::from_value(outcome.snapshot.as_ref())
            .map_err(|e| LockError::corrupt(path, e))?;
        let mut removed = 0;
        for lock in expired.iter().filter(|l| after.get(&l.id).is_none()) {
            removed += 1;
            if self.forget(&lock.id).is_some() {
                tracing::warn!(
                    resource = %lock.resource,
                    lock_id = %lock.id,
                    "held lock expired before renewal"
                );
            }
            inner.metrics.increment(metrics::LOCK_EXPIRED, &lock.resource);
            tracing::debug!(
                resource = %lock.resource,
                lock_id = %lock.id,
                owner = %lock.owner,
                expired_at = lock.expires_at,
                "removed expired lock"
            );
        }
        Ok(removed)
    }

    async fn sweep_queue(&self, path: &str) -> Result<usize, LockError> {
        let store = &self.inner.store;
        let current = store
            .get(path)
            .await
            .map_err(|e| LockError::coordination(path, e))?;
        let before = LockQueue::from_value(current.as_ref())
            .map_err(|e| LockError::corrupt(path, e))?;

        let now = self.inner.clock.now_millis();
        let outcome = store
            .transact(path, &|current| table::tidy_queue(current, now))
            .await
            .map_err(|e| LockError::coordination(path, e))?;
        if !outcome.committed {
            return Ok(0);
        }
        let after = LockQueue::from_value(outcome.snapshot.as_ref())
            .map_err(|e| LockError::corrupt(path, e))?;
        let removed = before
            .ids()
            .iter()
            .filter(|id| after.position(id).is_none())
            .count();
        tracing::debug!(path, removed, "pruned abandoned queue entries");
        Ok(removed)
    }

    /// Start a background task that calls [`sweep_expired`](Self::sweep_expired)
    /// every `config.interval`
    ///
    /// The task holds only a weak reference to the manager and exits once the
    /// last manager clone is dropped.
    pub fn start_sweeper(&self, config: SweepConfig) -> SweeperHandle {
        let weak: Weak<Inner<S, C, G>> = Arc::downgrade(&self.inner);
        let interval = config.interval;
        let span = tracing::info_span!("lock.sweeper", interval_ms = interval.as_millis() as u64);

        let task = tokio::spawn(
            async move {
                tracing::info!("sweeper started");
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    let manager = LockManager { inner };
                    if let Err(e) = manager.sweep_expired().await {
                        tracing::warn!(error = %e, "sweep failed");
                    }
                }
                tracing::info!("sweeper stopped");
            }
            .instrument(span),
        );
        SweeperHandle { task: Some(task) }
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
