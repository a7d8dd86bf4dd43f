// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors for versioned record operations

use tether_store::StoreError;
use thiserror::Error;

/// Unexpected faults during a versioned read or write
///
/// Conflicts and missing records are outcomes, not errors.
#[derive(Debug, Error)]
pub enum OccError {
    #[error("coordination store failure: {0}")]
    Store(#[from] StoreError),
    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("mutation failed: {0}")]
    Mutation(String),
    #[error("record already exists at {path}")]
    AlreadyExists { path: String },
}
