// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named registry of circuit breakers

use super::circuit::{BreakerStats, CircuitBreaker};
use super::config::BreakerConfig;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, TetherConfig};
use crate::metrics::{MetricsSink, TracingMetrics};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// One breaker per dependency name, created on first use
///
/// The first configuration registered for a name wins; later requests for
/// the same name get the existing instance.
pub struct BreakerManager<C = SystemClock> {
    defaults: BreakerConfig,
    overrides: BTreeMap<String, BreakerConfig>,
    clock: C,
    metrics: Arc<dyn MetricsSink>,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker<C>>>>,
}

impl BreakerManager {
    pub fn new(defaults: BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_parts(defaults, SystemClock, Arc::new(TracingMetrics))
    }

    /// Build from loaded configuration, honouring per-dependency overrides
    pub fn from_config(config: &TetherConfig) -> Result<Self, ConfigError> {
        let mut manager = Self::new(config.breaker_defaults.clone())?;
        for (name, breaker) in &config.breakers {
            breaker.validate()?;
            manager.overrides.insert(name.clone(), breaker.clone());
        }
        Ok(manager)
    }
}

impl<C: Clock> BreakerManager<C> {
    pub fn with_parts(
        defaults: BreakerConfig,
        clock: C,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            overrides: BTreeMap::new(),
            clock,
            metrics,
            breakers: Mutex::new(BTreeMap::new()),
        })
    }

    /// Register a configuration used when `name` is first created
    pub fn with_override(
        mut self,
        name: impl Into<String>,
        config: BreakerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        self.overrides.insert(name.into(), config);
        Ok(self)
    }

    /// Breaker for `name`, created with its override or the defaults
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker<C>> {
        let config = self
            .overrides
            .get(name)
            .unwrap_or(&self.defaults)
            .clone();
        let mut breakers = self.breakers();
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }
        // Configs were validated when registered
        let breaker = Arc::new(self.build(name, config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        tracing::debug!(breaker = name, "circuit breaker created");
        breaker
    }

    /// Breaker for `name`, created with `config` if it does not exist yet
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker<C>>, ConfigError> {
        let mut breakers = self.breakers();
        if let Some(existing) = breakers.get(name) {
            if existing.config() != &config {
                tracing::debug!(breaker = name, "ignoring config for existing breaker");
            }
            return Ok(Arc::clone(existing));
        }
        config.validate()?;
        let breaker = Arc::new(self.build(name, config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        tracing::debug!(breaker = name, "circuit breaker created");
        Ok(breaker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers().keys().cloned().collect()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers().remove(name)
    }

    pub fn get_all_stats(&self) -> BTreeMap<String, BreakerStats> {
        self.snapshot()
            .into_iter()
            .map(|b| (b.name().to_string(), b.stats()))
            .collect()
    }

    pub fn reset_all(&self) {
        let breakers = self.snapshot();
        for breaker in &breakers {
            breaker.reset();
        }
        tracing::info!(count = breakers.len(), "reset all circuit breakers");
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker<C>>> {
        self.breakers().values().cloned().collect()
    }

    fn build(&self, name: &str, config: BreakerConfig) -> CircuitBreaker<C> {
        CircuitBreaker::from_validated(name, config, self.clock.clone(), Arc::clone(&self.metrics))
    }

    fn breakers(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<CircuitBreaker<C>>>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
