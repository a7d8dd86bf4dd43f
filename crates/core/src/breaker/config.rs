// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker thresholds and timings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures inside `time_window` that trip the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub time_window: Duration,
    /// Per-call timeout; a call still running after this counts as a failure
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cooldown before an open circuit admits a trial call
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Samples older than this are discarded
    #[serde(with = "humantime_serde")]
    pub monitoring_window: Duration,
    /// Samples required before the failure count is trusted
    pub minimum_throughput: u32,
    /// Whether `execute_with_fallback` may substitute a fallback result
    ///
    /// The fallback itself is passed per call rather than stored here, so the
    /// config stays plain data loadable from TOML. Plain `execute` never falls
    /// back and reports `CallOutcome::Rejected` while the circuit is open.
    pub fallback_enabled: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            time_window: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(120),
            minimum_throughput: 5,
            fallback_enabled: false,
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window = window;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window = window;
        self
    }

    pub fn with_minimum_throughput(mut self, throughput: u32) -> Self {
        self.minimum_throughput = throughput;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker failure_threshold must be at least 1".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker success_threshold must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("time_window", self.time_window),
            ("timeout", self.timeout),
            ("reset_timeout", self.reset_timeout),
            ("monitoring_window", self.monitoring_window),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "breaker {name} must be non-zero"
                )));
            }
        }
        Ok(())
    }
}
