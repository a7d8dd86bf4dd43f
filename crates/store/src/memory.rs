// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process coordination store
//!
//! Every path lives in one mutex-guarded map, so a transaction is atomic with
//! respect to every other operation on the same store. Faults can be injected
//! to exercise retry paths.

use crate::{CoordinationStore, StoreError, TxnDecision, TxnFn, TxnOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Faults {
    /// Number of upcoming operations that fail
    fail_next: u32,
    /// While set, every operation fails
    unavailable: bool,
    /// Artificial delay applied before each operation
    latency: Option<Duration>,
}

/// Store backed by a `BTreeMap<String, Value>`
///
/// Clones share the same data, like handles to one remote store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<String, Value>>>,
    faults: Arc<Mutex<Faults>>,
    transactions: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with [`StoreError::Injected`]
    pub fn fail_next(&self, count: u32) {
        self.faults().fail_next = count;
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    /// Delay every operation, widening the window for interleavings
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults().latency = latency;
    }

    /// Number of transactions attempted, including failed ones
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored path
    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.data().clone()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply latency and consume one injected fault, if any
    async fn enter(&self, op: &str, path: &str) -> Result<(), StoreError> {
        let latency = self.faults().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults();
        if faults.unavailable {
            return Err(StoreError::Unavailable(format!("{op} {path}")));
        }
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Err(StoreError::Injected(format!("{op} {path}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn transact(&self, path: &str, update: &TxnFn<'_>) -> Result<TxnOutcome, StoreError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.enter("transact", path).await?;

        let mut data = self.data();
        let current = data.get(path);
        match update(current) {
            TxnDecision::Abort => Ok(TxnOutcome::aborted(current.cloned())),
            TxnDecision::Commit(Some(value)) => {
                data.insert(path.to_string(), value.clone());
                Ok(TxnOutcome::committed(Some(value)))
            }
            TxnDecision::Commit(None) => {
                data.remove(path);
                Ok(TxnOutcome::committed(None))
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.enter("get", path).await?;
        Ok(self.data().get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.enter("set", path).await?;
        self.data().insert(path.to_string(), value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.enter("delete", path).await?;
        self.data().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.enter("list", prefix).await?;
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .data()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
