// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breakers for calls to external dependencies
//!
//! - `CircuitBreaker`: failure-rate driven closed/open/half-open machine with
//!   call timeouts and optional fallback
//! - `BreakerManager`: named registry with get-or-create semantics

mod circuit;
mod config;
mod manager;
mod state;

pub use circuit::{BreakerError, BreakerStats, CallOutcome, CircuitBreaker};
pub use config::BreakerConfig;
pub use manager::BreakerManager;
pub use state::{BreakerEvent, BreakerInput, BreakerState, CircuitState, Sample};
