// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock manager and sweeper configuration

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lock manager configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length granted on acquisition and on each renewal
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// How long `acquire` keeps retrying before reporting a timeout
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Pause between acquisition attempts
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Whether granted locks are renewed in the background
    pub auto_renew: bool,
    /// How often auto-renewal runs; must be shorter than `ttl`
    #[serde(with = "humantime_serde")]
    pub renew_interval: Duration,
    /// Number of unexpired locks allowed per resource
    pub max_concurrent_locks: usize,
    /// Grant locks in queue order
    pub fairness_enabled: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
            auto_renew: true,
            renew_interval: Duration::from_secs(10),
            max_concurrent_locks: 1,
            fairness_enabled: false,
        }
    }
}

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_auto_renew(mut self, enabled: bool) -> Self {
        self.auto_renew = enabled;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_max_concurrent_locks(mut self, max: usize) -> Self {
        self.max_concurrent_locks = max;
        self
    }

    pub fn with_fairness(mut self, enabled: bool) -> Self {
        self.fairness_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::Invalid("lock ttl must be non-zero".into()));
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "lock retry_interval must be non-zero".into(),
            ));
        }
        if self.max_concurrent_locks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_locks must be at least 1".into(),
            ));
        }
        if self.auto_renew && (self.renew_interval.is_zero() || self.renew_interval >= self.ttl) {
            return Err(ConfigError::Invalid(format!(
                "renew_interval ({:?}) must be non-zero and shorter than ttl ({:?})",
                self.renew_interval, self.ttl
            )));
        }
        Ok(())
    }
}

/// Expired-lock sweeper configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// How often to scan for expired locks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl SweepConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
