// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tether-store: the coordination store contract
//!
//! This crate provides:
//! - The `CoordinationStore` trait consumed by the lock, versioned-record and
//!   circuit breaker primitives in `tether-core`
//! - `MemoryStore`, an in-process implementation with fault injection
//! - `TracedStore`, a wrapper that adds spans and structured logging
//!
//! The store offers atomic read-modify-write on a single path plus plain
//! get/set/delete. It has no notion of leases or TTLs; all expiry logic lives
//! above it.

mod memory;
mod traced;

pub use memory::MemoryStore;
pub use traced::TracedStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("injected fault: {0}")]
    Injected(String),
}

/// What a transaction update function decided to do with the current value
#[derive(Debug, Clone, PartialEq)]
pub enum TxnDecision {
    /// Replace the stored value; `None` deletes the path
    Commit(Option<Value>),
    /// Leave the stored value untouched and report non-commit
    Abort,
}

/// Result of a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TxnOutcome {
    /// Whether the update function's value was written
    pub committed: bool,
    /// The value stored at the path once the transaction finished: the new
    /// value on commit, the untouched current value on abort
    pub snapshot: Option<Value>,
}

impl TxnOutcome {
    pub fn committed(snapshot: Option<Value>) -> Self {
        Self {
            committed: true,
            snapshot,
        }
    }

    pub fn aborted(snapshot: Option<Value>) -> Self {
        Self {
            committed: false,
            snapshot,
        }
    }
}

/// Update function passed to [`CoordinationStore::transact`]
///
/// The store may invoke it more than once under contention, so it must be a
/// pure function of the current value.
pub type TxnFn<'a> = dyn Fn(Option<&Value>) -> TxnDecision + Send + Sync + 'a;

/// Remote store offering atomic single-path transactions
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Atomically read the value at `path`, apply `update`, and write the result
    async fn transact(&self, path: &str, update: &TxnFn<'_>) -> Result<TxnOutcome, StoreError>;

    /// Read the value at `path`
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the value at `path`
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Remove the value at `path`; removing a missing path succeeds
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// List every path below `prefix` that currently holds a value
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl<S: CoordinationStore + ?Sized> CoordinationStore for std::sync::Arc<S> {
    async fn transact(&self, path: &str, update: &TxnFn<'_>) -> Result<TxnOutcome, StoreError> {
        (**self).transact(path, update).await
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(path, value).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        (**self).delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(prefix).await
    }
}

/// Join path segments with `/`, skipping empty segments
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
