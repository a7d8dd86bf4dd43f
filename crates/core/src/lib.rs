// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tether-core: coordination and fault-isolation primitives
//!
//! This crate provides:
//! - A lease-based distributed lock manager with fairness, auto-renewal and
//!   an expiry sweeper
//! - An optimistic-concurrency manager for versioned records
//! - Circuit breakers with a named registry
//!
//! All cross-process state goes through a `tether_store::CoordinationStore`.

pub mod clock;
pub mod config;
pub mod id;
pub mod metrics;

pub mod breaker;
pub mod lock;
pub mod versioned;

// Re-exports
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, TetherConfig};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics, TracingMetrics};
pub use tether_store as store;
