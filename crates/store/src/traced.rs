// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced store wrapper for consistent observability

use crate::{CoordinationStore, StoreError, TxnFn, TxnOutcome};
use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

/// Wrapper that adds tracing to any CoordinationStore
#[derive(Clone)]
pub struct TracedStore<S> {
    inner: S,
}

impl<S> TracedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn log_outcome<T>(result: &Result<T, StoreError>, start: std::time::Instant) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::debug!(elapsed_ms, "ok"),
        Err(e) => tracing::warn!(elapsed_ms, error = %e, "store operation failed"),
    }
}

#[async_trait]
impl<S: CoordinationStore> CoordinationStore for TracedStore<S> {
    async fn transact(&self, path: &str, update: &TxnFn<'_>) -> Result<TxnOutcome, StoreError> {
        let span = tracing::info_span!("store.transact", path);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.transact(path, update).await;
            if let Ok(outcome) = &result {
                tracing::debug!(committed = outcome.committed, "transaction finished");
            }
            log_outcome(&result, start);
            result
        }
        .instrument(span)
        .await
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let span = tracing::debug_span!("store.get", path);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.get(path).await;
            if let Ok(value) = &result {
                tracing::trace!(found = value.is_some(), "read");
            }
            log_outcome(&result, start);
            result
        }
        .instrument(span)
        .await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let span = tracing::info_span!("store.set", path);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.set(path, value).await;
            log_outcome(&result, start);
            result
        }
        .instrument(span)
        .await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let span = tracing::info_span!("store.delete", path);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.delete(path).await;
            log_outcome(&result, start);
            result
        }
        .instrument(span)
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let span = tracing::debug_span!("store.list", prefix);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.list(prefix).await;
            if let Ok(paths) = &result {
                tracing::trace!(count = paths.len(), "listed");
            }
            log_outcome(&result, start);
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
