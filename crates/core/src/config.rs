// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration for every primitive, loadable from TOML
//!
//! ```toml
//! [locks]
//! ttl = "30s"
//! fairness_enabled = true
//!
//! [sweep]
//! interval = "1m"
//!
//! [breaker_defaults]
//! failure_threshold = 5
//!
//! [breakers.stripe]
//! timeout = "5s"
//! ```

use crate::breaker::BreakerConfig;
use crate::lock::{LockConfig, SweepConfig};
use crate::versioned::OptimisticConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub locks: LockConfig,
    pub sweep: SweepConfig,
    pub optimistic: OptimisticConfig,
    pub breaker_defaults: BreakerConfig,
    /// Per-dependency overrides, keyed by breaker name
    pub breakers: BTreeMap<String, BreakerConfig>,
}

impl TetherConfig {
    /// Parse and validate TOML content
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            breakers = config.breakers.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.locks.validate()?;
        if self.sweep.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep interval must be non-zero".into(),
            ));
        }
        self.optimistic.validate()?;
        self.breaker_defaults.validate()?;
        for (name, breaker) in &self.breakers {
            breaker
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("breaker {name}: {e}")))?;
        }
        Ok(())
    }

    /// Configuration for the breaker guarding `name`
    pub fn breaker_config(&self, name: &str) -> &BreakerConfig {
        self.breakers.get(name).unwrap_or(&self.breaker_defaults)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
