// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breaker wrapping async calls

use super::config::BreakerConfig;
use super::state::{BreakerEvent, BreakerInput, BreakerState, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;
use crate::metrics::{self, MetricsSink, TracingMetrics};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Result of a call made through a breaker
#[derive(Debug, PartialEq, Eq)]
pub enum CallOutcome<T, E> {
    Success(T),
    /// The wrapped call returned an error
    Failed(E),
    /// The wrapped call did not finish within the breaker timeout
    TimedOut { after: Duration },
    /// The circuit is open; the call was not made
    Rejected { retry_in: Duration },
    /// The circuit is open and the fallback produced this value
    Fallback(T),
}

impl<T, E> CallOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn from_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// Collapse into a `Result`, treating fallback values as success
    pub fn into_result(self, name: &str) -> Result<T, BreakerError<E>> {
        match self {
            Self::Success(value) | Self::Fallback(value) => Ok(value),
            Self::Failed(e) => Err(BreakerError::Inner(e)),
            Self::TimedOut { after } => Err(BreakerError::Timeout {
                name: name.to_string(),
                after,
            }),
            Self::Rejected { retry_in } => Err(BreakerError::Open {
                name: name.to_string(),
                retry_in,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit {name} is open; retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },
    #[error("call through circuit {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of a breaker
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub recent_requests: usize,
    pub failure_rate: f64,
    pub last_failure_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub state_changed_at: u64,
    pub next_retry_at: Option<u64>,
}

/// Circuit breaker guarding one named dependency
pub struct CircuitBreaker<C = SystemClock> {
    name: String,
    config: BreakerConfig,
    clock: C,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_parts(name, config, SystemClock, Arc::new(TracingMetrics))
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_parts(
        name: impl Into<String>,
        config: BreakerConfig,
        clock: C,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(name, config, clock, metrics))
    }

    pub(crate) fn from_validated(
        name: impl Into<String>,
        config: BreakerConfig,
        clock: C,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let now = clock.now_millis();
        Self {
            name: name.into(),
            config,
            clock,
            metrics,
            state: Mutex::new(BreakerState::new(now)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock_state().state
    }

    /// Run `call` unless the circuit is open, bounded by the breaker timeout
    ///
    /// An open circuit yields `Rejected`; use
    /// [`execute_with_fallback`](Self::execute_with_fallback) to substitute a
    /// value instead.
    ///
    /// A timed-out call is dropped; whatever it would have returned later has
    /// no effect on the breaker.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> CallOutcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(retry_in) = self.admit() {
            return CallOutcome::Rejected { retry_in };
        }

        match tokio::time::timeout(self.config.timeout, call()).await {
            Ok(Ok(value)) => {
                self.apply(BreakerInput::Success);
                self.metrics.increment(metrics::BREAKER_SUCCESS, &self.name);
                CallOutcome::Success(value)
            }
            Ok(Err(e)) => {
                self.apply(BreakerInput::Failure);
                self.metrics.increment(metrics::BREAKER_FAILURE, &self.name);
                tracing::debug!(breaker = %self.name, "call failed");
                CallOutcome::Failed(e)
            }
            Err(_) => {
                self.apply(BreakerInput::Failure);
                self.metrics.increment(metrics::BREAKER_FAILURE, &self.name);
                tracing::warn!(
                    breaker = %self.name,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "call timed out"
                );
                CallOutcome::TimedOut {
                    after: self.config.timeout,
                }
            }
        }
    }

    /// Like [`execute`](Self::execute), substituting `fallback` when the
    /// circuit is open and fallbacks are enabled
    pub async fn execute_with_fallback<F, Fut, T, E, B, BFut>(
        &self,
        call: F,
        fallback: B,
    ) -> CallOutcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        B: FnOnce() -> BFut,
        BFut: Future<Output = T>,
    {
        match self.execute(call).await {
            CallOutcome::Rejected { .. } if self.config.fallback_enabled => {
                tracing::debug!(breaker = %self.name, "serving fallback");
                CallOutcome::Fallback(fallback().await)
            }
            other => other,
        }
    }

    /// Execute and collapse the outcome into a `Result`
    pub async fn call<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(call).await.into_result(&self.name)
    }

    pub fn stats(&self) -> BreakerStats {
        let state = self.lock_state();
        BreakerStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            total_requests: state.total_requests,
            recent_requests: state.recent.len(),
            failure_rate: state.failure_rate(),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            state_changed_at: state.state_changed_at,
            next_retry_at: state.next_retry_at,
        }
    }

    /// Return to closed with counters and samples cleared
    pub fn reset(&self) {
        self.apply(BreakerInput::Reset);
        tracing::info!(breaker = %self.name, "circuit reset");
    }

    pub fn force_open(&self) {
        self.apply(BreakerInput::ForceOpen);
    }

    pub fn force_closed(&self) {
        self.apply(BreakerInput::ForceClosed);
    }

    /// Returns the remaining cooldown if the call must fail fast
    fn admit(&self) -> Option<Duration> {
        let now = self.clock.now_millis();
        let rejected = self
            .apply(BreakerInput::Attempt)
            .into_iter()
            .find_map(|event| match event {
                BreakerEvent::Rejected { retry_at } => Some(retry_at),
                BreakerEvent::StateChanged { .. } => None,
            })?;
        self.metrics.increment(metrics::BREAKER_FAST_FAIL, &self.name);
        tracing::debug!(breaker = %self.name, retry_at = rejected, "circuit open, failing fast");
        Some(Duration::from_millis(rejected.saturating_sub(now)))
    }

    /// Apply one input under the state lock, then report its effects
    fn apply(&self, input: BreakerInput) -> Vec<BreakerEvent> {
        let now = self.clock.now_millis();
        let (events, rate, current) = {
            let mut state = self.lock_state();
            let (next, events) = state.transition(input, &self.config, now);
            *state = next;
            (events, state.failure_rate(), state.state)
        };

        for event in &events {
            if let BreakerEvent::StateChanged { from, to } = event {
                self.metrics.increment(metrics::BREAKER_STATE_CHANGE, &self.name);
                match to {
                    CircuitState::Open => tracing::warn!(
                        breaker = %self.name,
                        %from,
                        %to,
                        failure_rate = rate,
                        "circuit opened"
                    ),
                    _ => tracing::info!(breaker = %self.name, %from, %to, "circuit state changed"),
                }
            }
        }
        if input != BreakerInput::Attempt || !events.is_empty() {
            self.metrics.gauge(metrics::BREAKER_FAILURE_RATE, &self.name, rate);
            self.metrics
                .gauge(metrics::BREAKER_STATE, &self.name, current.gauge_value());
        }
        events
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "circuit_tests.rs"]
mod tests;
