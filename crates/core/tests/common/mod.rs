// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use tether_core::lock::{Lock, LockConfig, LockManager};
use tether_core::store::MemoryStore;
use tether_core::{FakeClock, MemoryMetrics, SequentialIdGen};
use tracing_subscriber::EnvFilter;

pub type Locks = LockManager<MemoryStore, FakeClock, SequentialIdGen>;

/// Route `RUST_LOG`-filtered output to the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A lock manager for one simulated process sharing `store` and `clock`
pub fn lock_manager(
    process: &str,
    store: &MemoryStore,
    clock: &FakeClock,
    config: LockConfig,
) -> (Locks, MemoryMetrics) {
    let metrics = MemoryMetrics::new();
    let manager = LockManager::with_parts(
        store.clone(),
        config,
        clock.clone(),
        SequentialIdGen::new(process),
        Arc::new(metrics.clone()),
    )
    .unwrap();
    (manager, metrics)
}

pub async fn grant(locks: &Locks, resource: &str, owner: &str) -> Lock {
    locks
        .acquire(resource, owner, BTreeMap::new())
        .await
        .unwrap()
        .granted()
        .expect("lock should be granted")
}
