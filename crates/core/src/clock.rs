// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for lease and breaker timestamps
//!
//! Lease deadlines are written to the shared store and compared by other
//! processes, so timestamps are wall-clock milliseconds since the Unix epoch
//! rather than process-local `Instant`s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time in epoch milliseconds
pub trait Clock: Clone + Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// Real system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Fake clock for testing with controllable time
///
/// Clones share the same current time.
#[derive(Clone, Debug)]
pub struct FakeClock {
    current: Arc<AtomicU64>,
}

impl FakeClock {
    /// Start at a fixed, recognisable instant (2026-01-01T00:00:00Z)
    pub fn new() -> Self {
        Self::at(1_767_225_600_000)
    }

    pub fn at(millis: u64) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        self.current
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the clock to a specific epoch millisecond
    pub fn set(&self, millis: u64) {
        self.current.store(millis, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// Milliseconds in a duration, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
