// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breaker state machine
//!
//! Pure transitions over epoch-millisecond timestamps; the wrapper in
//! `circuit.rs` owns timing, locking and side effects.

use super::config::BreakerConfig;
use crate::clock::millis;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric value reported on the state gauge
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// One recorded call result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub at: u64,
    pub success: bool,
}

/// Inputs that drive the breaker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerInput {
    /// A call wants to run
    Attempt,
    Success,
    Failure,
    Reset,
    ForceOpen,
    ForceClosed,
}

/// Observable consequences of a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreakerEvent {
    StateChanged {
        from: CircuitState,
        to: CircuitState,
    },
    /// The attempt must fail fast; the circuit reopens for trials at `retry_at`
    Rejected { retry_at: u64 },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakerState {
    pub state: CircuitState,
    /// Failures since the last transition
    pub failure_count: u32,
    /// Successes since the last transition
    pub success_count: u32,
    pub total_requests: u64,
    pub last_failure_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub state_changed_at: u64,
    /// Set exactly while open
    pub next_retry_at: Option<u64>,
    pub recent: VecDeque<Sample>,
}

impl BreakerState {
    pub fn new(now: u64) -> Self {
        Self {
            state_changed_at: now,
            ..Self::default()
        }
    }

    /// Failures among recent samples no older than `time_window`
    pub fn failures_within(&self, config: &BreakerConfig, now: u64) -> usize {
        let since = now.saturating_sub(millis(config.time_window));
        self.recent
            .iter()
            .filter(|s| !s.success && s.at >= since)
            .count()
    }

    /// Share of recent samples that failed, in `[0, 1]`
    pub fn failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|s| !s.success).count();
        failures as f64 / self.recent.len() as f64
    }

    fn should_trip(&self, config: &BreakerConfig, now: u64) -> bool {
        self.recent.len() >= config.minimum_throughput as usize
            && self.failures_within(config, now) >= config.failure_threshold as usize
    }

    fn record(&mut self, success: bool, config: &BreakerConfig, now: u64) {
        self.total_requests = self.total_requests.saturating_add(1);
        self.recent.push_back(Sample { at: now, success });
        let horizon = now.saturating_sub(millis(config.monitoring_window));
        while self.recent.front().is_some_and(|s| s.at < horizon) {
            self.recent.pop_front();
        }
        if success {
            self.success_count = self.success_count.saturating_add(1);
            self.last_success_at = Some(now);
        } else {
            self.failure_count = self.failure_count.saturating_add(1);
            self.last_failure_at = Some(now);
        }
    }

    fn move_to(
        &mut self,
        to: CircuitState,
        config: &BreakerConfig,
        now: u64,
        events: &mut Vec<BreakerEvent>,
    ) {
        let from = self.state;
        self.state = to;
        self.state_changed_at = now;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_retry_at = match to {
            CircuitState::Open => Some(now.saturating_add(millis(config.reset_timeout))),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        };
        if to == CircuitState::Closed {
            self.recent.clear();
        }
        if from != to {
            events.push(BreakerEvent::StateChanged { from, to });
        }
    }

    /// Pure state transition function
    pub fn transition(
        &self,
        input: BreakerInput,
        config: &BreakerConfig,
        now: u64,
    ) -> (BreakerState, Vec<BreakerEvent>) {
        let mut next = self.clone();
        let mut events = Vec::new();

        match (self.state, input) {
            (CircuitState::Open, BreakerInput::Attempt) => match self.next_retry_at {
                Some(retry_at) if now < retry_at => {
                    events.push(BreakerEvent::Rejected { retry_at });
                }
                _ => next.move_to(CircuitState::HalfOpen, config, now, &mut events),
            },
            (_, BreakerInput::Attempt) => {}

            (CircuitState::Open, BreakerInput::Success) => {
                // A call admitted before the trip finished late; it counts as a trial
                next.move_to(CircuitState::HalfOpen, config, now, &mut events);
                next.record(true, config, now);
                next.close_if_recovered(config, now, &mut events);
            }
            (CircuitState::HalfOpen, BreakerInput::Success) => {
                next.record(true, config, now);
                next.close_if_recovered(config, now, &mut events);
            }
            (CircuitState::Closed, BreakerInput::Success) => {
                next.record(true, config, now);
                if next.should_trip(config, now) {
                    next.move_to(CircuitState::Open, config, now, &mut events);
                }
            }

            (CircuitState::Open, BreakerInput::Failure) => {
                next.record(false, config, now);
            }
            (CircuitState::Closed | CircuitState::HalfOpen, BreakerInput::Failure) => {
                next.record(false, config, now);
                if next.should_trip(config, now) {
                    next.move_to(CircuitState::Open, config, now, &mut events);
                }
            }

            (_, BreakerInput::Reset) => {
                next.move_to(CircuitState::Closed, config, now, &mut events);
                next.last_failure_at = None;
                next.last_success_at = None;
            }
            (_, BreakerInput::ForceOpen) => {
                next.move_to(CircuitState::Open, config, now, &mut events);
            }
            (_, BreakerInput::ForceClosed) => {
                next.move_to(CircuitState::Closed, config, now, &mut events);
            }
        }

        (next, events)
    }

    fn close_if_recovered(
        &mut self,
        config: &BreakerConfig,
        now: u64,
        events: &mut Vec<BreakerEvent>,
    ) {
        if self.success_count >= config.success_threshold {
            self.move_to(CircuitState::Closed, config, now, events);
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
