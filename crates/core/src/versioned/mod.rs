// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned records with optimistic concurrency control

mod config;
mod error;
mod manager;
mod record;

pub use config::OptimisticConfig;
pub use error::OccError;
pub use manager::{IntegrityReport, OptimisticConcurrencyManager, RetryOutcome, UpdateOutcome};
pub use record::{checksum, Fields, VersionInfo, Versioned, VERSION_FIELD};
