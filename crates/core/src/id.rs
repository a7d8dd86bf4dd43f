// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation for lock acquisition attempts

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generates identifiers that are unique per acquisition attempt
pub trait IdGen: Clone + Send + Sync + 'static {
    fn next(&self) -> String;
}

/// UUID-based ID generator for production use
///
/// IDs look like `lock_1b4e28ba2fa1...`, so they remain readable in the store
/// next to resource names.
#[derive(Clone, Debug)]
pub struct UuidIdGen {
    prefix: &'static str,
}

impl UuidIdGen {
    pub fn with_prefix(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl Default for UuidIdGen {
    fn default() -> Self {
        Self::with_prefix("lock")
    }
}

impl IdGen for UuidIdGen {
    fn next(&self) -> String {
        format!("{}_{}", self.prefix, uuid::Uuid::new_v4().simple())
    }
}

/// Sequential ID generator for testing
#[derive(Clone, Debug)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("lock")
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}
