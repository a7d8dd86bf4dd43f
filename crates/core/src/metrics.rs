// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics sink consumed by the coordination primitives
//!
//! Counters and gauges are keyed by a metric name and a subject key (the lock
//! resource, the record collection or the breaker name).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const LOCK_ACQUIRED: &str = "lock.acquired";
pub const LOCK_RELEASED: &str = "lock.released";
pub const LOCK_RENEWED: &str = "lock.renewed";
pub const LOCK_EXPIRED: &str = "lock.expired";
pub const LOCK_FAILED: &str = "lock.failed";

pub const OCC_SUCCESS: &str = "occ.success";
pub const OCC_CONFLICT: &str = "occ.conflict";
pub const OCC_ERROR: &str = "occ.error";

pub const BREAKER_SUCCESS: &str = "breaker.success";
pub const BREAKER_FAILURE: &str = "breaker.failure";
pub const BREAKER_FAST_FAIL: &str = "breaker.fast_fail";
pub const BREAKER_STATE_CHANGE: &str = "breaker.state_change";
pub const BREAKER_FAILURE_RATE: &str = "breaker.failure_rate";
pub const BREAKER_STATE: &str = "breaker.state";

/// Destination for counters and gauges
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, name: &'static str, key: &str);

    fn gauge(&self, name: &'static str, key: &str, value: f64);
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &'static str, _key: &str) {}

    fn gauge(&self, _name: &'static str, _key: &str, _value: f64) {}
}

/// Emits each sample as a structured `tracing` record
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &'static str, key: &str) {
        tracing::debug!(metric = name, key, value = 1u64, "counter");
    }

    fn gauge(&self, name: &'static str, key: &str, value: f64) {
        tracing::debug!(metric = name, key, value, "gauge");
    }
}

#[derive(Default)]
struct Recorded {
    counters: BTreeMap<(String, String), u64>,
    gauges: BTreeMap<(String, String), f64>,
}

/// Keeps counters and last gauge values in memory
///
/// Clones share the same samples.
#[derive(Clone, Default)]
pub struct MemoryMetrics {
    recorded: Arc<Mutex<Recorded>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value for one key
    pub fn counter(&self, name: &str, key: &str) -> u64 {
        self.recorded()
            .counters
            .get(&(name.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Counter value summed over every key
    pub fn total(&self, name: &str) -> u64 {
        self.recorded()
            .counters
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Last value reported for a gauge
    pub fn gauge_value(&self, name: &str, key: &str) -> Option<f64> {
        self.recorded()
            .gauges
            .get(&(name.to_string(), key.to_string()))
            .copied()
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MetricsSink for MemoryMetrics {
    fn increment(&self, name: &'static str, key: &str) {
        *self
            .recorded()
            .counters
            .entry((name.to_string(), key.to_string()))
            .or_insert(0) += 1;
    }

    fn gauge(&self, name: &'static str, key: &str, value: f64) {
        self.recorded()
            .gauges
            .insert((name.to_string(), key.to_string()), value);
    }
}
