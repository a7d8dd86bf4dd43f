// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the lock manager

use super::table::LockId;
use std::time::Duration;
use tether_store::StoreError;
use thiserror::Error;

/// Errors surfaced by lock operations
///
/// Expected outcomes (timeout, lost lease, unknown lock id) are reported
/// through the outcome enums instead, except by `execute_with_lock`, which has
/// no other way to report that the closure never ran or ran without
/// exclusivity.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on {resource}")]
    AcquireTimeout { resource: String, waited: Duration },
    #[error("lease {lock_id} on {resource} was lost before the work finished")]
    LeaseLost { resource: String, lock_id: LockId },
    #[error("coordination store failure for {resource}: {source}")]
    Coordination {
        resource: String,
        #[source]
        source: StoreError,
    },
    #[error("corrupt lock data at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LockError {
    pub(crate) fn coordination(resource: &str, source: StoreError) -> Self {
        Self::Coordination {
            resource: resource.to_string(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &str, source: serde_json::Error) -> Self {
        Self::Corrupt {
            path: path.to_string(),
            source,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Corrupt { .. })
    }
}
