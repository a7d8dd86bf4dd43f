// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optimistic concurrency over versioned records
//!
//! Readers take a version, writers name the version they read. The store
//! transaction commits a write only if that version is still current.

use super::config::OptimisticConfig;
use super::error::OccError;
use super::record::{self, Fields, VersionInfo, Versioned};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;
use crate::metrics::{self, MetricsSink, TracingMetrics};
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::sync::Arc;
use tether_store::{join_path, CoordinationStore};
use tracing::Instrument;

/// Result of a conditional update
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(VersionInfo),
    /// The stored version moved on; re-read and try again
    Conflict { expected: u64, current: u64 },
    /// No record at the path; retrying will not help
    NotFound,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Final result of [`OptimisticConcurrencyManager::update_with_retry`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOutcome {
    pub outcome: UpdateOutcome,
    /// Update attempts made, including the final one
    pub attempts: u32,
    /// Whether the caller may reasonably try again later
    pub retryable: bool,
}

/// Result of re-checking a record's checksum
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityReport {
    Intact { version: u64 },
    Corrupted { stored: String, computed: String },
    /// The record exists but carries no version bookkeeping
    Unversioned,
    Missing,
}

/// Versioned read/update protocol over a coordination store
#[derive(Clone)]
pub struct OptimisticConcurrencyManager<S, C = SystemClock> {
    store: S,
    clock: C,
    config: OptimisticConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<S: CoordinationStore> OptimisticConcurrencyManager<S> {
    pub fn new(store: S, config: OptimisticConfig) -> Result<Self, ConfigError> {
        Self::with_parts(store, config, SystemClock, Arc::new(TracingMetrics))
    }
}

impl<S, C> OptimisticConcurrencyManager<S, C>
where
    S: CoordinationStore,
    C: Clock,
{
    pub fn with_parts(
        store: S,
        config: OptimisticConfig,
        clock: C,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
            metrics,
        })
    }

    pub fn config(&self) -> &OptimisticConfig {
        &self.config
    }

    /// Read a record and its version; `None` if it does not exist
    pub async fn read_with_version(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Versioned>, OccError> {
        let path = join_path(&[collection, id]);
        let value = self.store.get(&path).await?;
        Versioned::from_value(value.as_ref()).map_err(|source| OccError::Corrupt { path, source })
    }

    /// Write `data` as version 1; fails if the record already exists
    pub async fn create_with_version(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
        actor: &str,
    ) -> Result<VersionInfo, OccError> {
        let path = join_path(&[collection, id]);
        let now = self.now();
        let outcome = self
            .store
            .transact(&path, &|current| record::create(current, &data, actor, now))
            .await
            .inspect_err(|_| self.metrics.increment(metrics::OCC_ERROR, collection))?;

        if !outcome.committed {
            self.metrics.increment(metrics::OCC_ERROR, collection);
            return Err(OccError::AlreadyExists { path });
        }
        let version = Versioned::from_value(outcome.snapshot.as_ref())
            .map_err(|source| OccError::Corrupt {
                path: path.clone(),
                source,
            })?
            .and_then(|r| r.version)
            .unwrap_or_else(|| VersionInfo::stamp(1, &data, actor, now));

        self.metrics.increment(metrics::OCC_SUCCESS, collection);
        tracing::info!(collection, id, actor, "versioned record created");
        Ok(version)
    }

    /// Merge `patch` into the record if its version is still `expected`
    pub async fn update_with_version(
        &self,
        collection: &str,
        id: &str,
        patch: &Fields,
        expected: u64,
        actor: &str,
    ) -> Result<UpdateOutcome, OccError> {
        let span = tracing::info_span!("occ.update", collection, id, expected, actor);
        self.conditional_update(collection, id, patch, expected, actor)
            .instrument(span)
            .await
    }

    async fn conditional_update(
        &self,
        collection: &str,
        id: &str,
        patch: &Fields,
        expected: u64,
        actor: &str,
    ) -> Result<UpdateOutcome, OccError> {
        let path = join_path(&[collection, id]);
        let now = self.now();

        let outcome = match self
            .store
            .transact(&path, &|current| {
                record::apply_patch(current, patch, expected, actor, now)
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.increment(metrics::OCC_ERROR, collection);
                tracing::warn!(error = %e, "versioned update failed on store");
                return Err(e.into());
            }
        };

        let stored = match Versioned::from_value(outcome.snapshot.as_ref()) {
            Ok(stored) => stored,
            Err(source) => {
                self.metrics.increment(metrics::OCC_ERROR, collection);
                return Err(OccError::Corrupt { path, source });
            }
        };

        let result = match stored {
            None => UpdateOutcome::NotFound,
            Some(record) => {
                let current = record.current_version();
                match record.version {
                    Some(info) if outcome.committed => UpdateOutcome::Applied(info),
                    _ => UpdateOutcome::Conflict { expected, current },
                }
            }
        };

        match &result {
            UpdateOutcome::Applied(info) => {
                self.metrics.increment(metrics::OCC_SUCCESS, collection);
                tracing::info!(version = info.version, "versioned update applied");
            }
            UpdateOutcome::Conflict { current, .. } => {
                self.metrics.increment(metrics::OCC_CONFLICT, collection);
                tracing::debug!(current, "version conflict");
            }
            UpdateOutcome::NotFound => {
                self.metrics.increment(metrics::OCC_ERROR, collection);
                tracing::debug!("versioned record not found");
            }
        }
        Ok(result)
    }

    /// Read, mutate and conditionally write, retrying on conflict
    ///
    /// `mutate` receives the current fields and version and returns the patch
    /// to merge. It runs again on a fresh read after every conflict, with an
    /// exponential pause in between. `max_retries` overrides the configured
    /// attempt budget.
    pub async fn update_with_retry<F, E>(
        &self,
        collection: &str,
        id: &str,
        actor: &str,
        max_retries: Option<u32>,
        mut mutate: F,
    ) -> Result<RetryOutcome, OccError>
    where
        F: FnMut(&Fields, u64) -> Result<Fields, E>,
        E: Display,
    {
        let budget = max_retries.unwrap_or(self.config.max_retries).max(1);
        let mut last = UpdateOutcome::NotFound;

        for attempt in 0..budget {
            let Some(current) = self.read_with_version(collection, id).await? else {
                self.metrics.increment(metrics::OCC_ERROR, collection);
                return Ok(RetryOutcome {
                    outcome: UpdateOutcome::NotFound,
                    attempts: attempt + 1,
                    retryable: false,
                });
            };
            let version = current.current_version();

            let patch = match mutate(&current.data, version) {
                Ok(patch) => patch,
                Err(e) => {
                    self.metrics.increment(metrics::OCC_ERROR, collection);
                    tracing::warn!(collection, id, error = %e, "mutation rejected the record");
                    return Err(OccError::Mutation(e.to_string()));
                }
            };

            last = self
                .update_with_version(collection, id, &patch, version, actor)
                .await?;
            match &last {
                UpdateOutcome::Applied(_) | UpdateOutcome::NotFound => {
                    return Ok(RetryOutcome {
                        retryable: last.is_retryable(),
                        outcome: last,
                        attempts: attempt + 1,
                    });
                }
                UpdateOutcome::Conflict { .. } if attempt + 1 < budget => {
                    let pause = self.config.backoff(attempt);
                    tracing::debug!(
                        collection,
                        id,
                        attempt,
                        backoff_ms = pause.as_millis() as u64,
                        "retrying after conflict"
                    );
                    tokio::time::sleep(pause).await;
                }
                UpdateOutcome::Conflict { .. } => {}
            }
        }

        tracing::warn!(collection, id, attempts = budget, "gave up after repeated conflicts");
        Ok(RetryOutcome {
            outcome: last,
            attempts: budget,
            retryable: true,
        })
    }

    /// Recompute a record's checksum and compare it with the stored one
    pub async fn verify_integrity(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<IntegrityReport, OccError> {
        let Some(record) = self.read_with_version(collection, id).await? else {
            return Ok(IntegrityReport::Missing);
        };
        let Some(info) = &record.version else {
            return Ok(IntegrityReport::Unversioned);
        };
        let computed = record::checksum(&record.data);
        if computed == info.checksum {
            Ok(IntegrityReport::Intact {
                version: info.version,
            })
        } else {
            tracing::warn!(
                collection,
                id,
                stored = %info.checksum,
                computed = %computed,
                "record checksum mismatch"
            );
            Ok(IntegrityReport::Corrupted {
                stored: info.checksum.clone(),
                computed,
            })
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.clock.now_millis()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
