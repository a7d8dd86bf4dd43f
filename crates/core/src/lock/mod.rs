// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease-based distributed locks
//!
//! - `LockManager`: acquire, renew and release leases held in the store
//! - Fairness queue granting waiters in arrival order
//! - Background auto-renewal per held lock
//! - `start_sweeper`: periodic cleanup of expired leases

mod config;
mod error;
mod manager;
mod sweeper;
mod table;

pub use config::{LockConfig, SweepConfig};
pub use error::LockError;
pub use manager::{AcquireOutcome, LockGuard, LockManager, ReleaseOutcome, RenewOutcome};
pub use sweeper::{SweepReport, SweeperHandle};
pub use table::{Lock, LockId, LockQueue, LockTable, QueueEntry};
