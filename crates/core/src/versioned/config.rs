// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for [`update_with_retry`](super::OptimisticConcurrencyManager::update_with_retry)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
    /// Attempts made before giving up on conflicts
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(1),
        }
    }
}

impl OptimisticConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Pause after the `attempt`-th conflict (0-based): `min(base * 2^attempt, cap)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "optimistic max_retries must be at least 1".into(),
            ));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(ConfigError::Invalid(format!(
                "optimistic backoff_base ({:?}) exceeds backoff_cap ({:?})",
                self.backoff_base, self.backoff_cap
            )));
        }
        Ok(())
    }
}
