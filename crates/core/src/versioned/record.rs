// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned record layout and the pure updates applied to it
//!
//! A record is a JSON object holding the caller's fields plus a reserved
//! `_version` object. The checksum covers the caller's fields only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_store::TxnDecision;

/// Reserved field holding [`VersionInfo`]
pub const VERSION_FIELD: &str = "_version";

/// Caller-visible record content
pub type Fields = Map<String, Value>;

/// Version bookkeeping stored alongside a record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Starts at 1; increments by exactly one per applied update
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub modified_by: String,
    /// CRC32 of the canonical JSON of the record's fields, lowercase hex
    pub checksum: String,
}

impl VersionInfo {
    pub(crate) fn stamp(version: u64, fields: &Fields, actor: &str, now: DateTime<Utc>) -> Self {
        Self {
            version,
            last_modified: now,
            modified_by: actor.to_string(),
            checksum: checksum(fields),
        }
    }
}

/// A record as read from the store
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub data: Fields,
    /// `None` for records written without version bookkeeping
    pub version: Option<VersionInfo>,
}

impl Versioned {
    /// The version a conditional update must name; unversioned records are 0
    pub fn current_version(&self) -> u64 {
        self.version.as_ref().map_or(0, |v| v.version)
    }

    /// Decode a stored record; a missing path is `None`
    pub fn from_value(value: Option<&Value>) -> Result<Option<Self>, serde_json::Error> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let mut data = Fields::deserialize(value)?;
        let version = data
            .remove(VERSION_FIELD)
            .map(VersionInfo::deserialize)
            .transpose()?;
        Ok(Some(Self { data, version }))
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.data.clone();
        if let Some(info) = &self.version {
            if let Ok(info) = serde_json::to_value(info) {
                object.insert(VERSION_FIELD.to_string(), info);
            }
        }
        Value::Object(object)
    }

    /// Whether the stored checksum matches the fields
    pub fn checksum_matches(&self) -> Option<bool> {
        self.version
            .as_ref()
            .map(|info| info.checksum == checksum(&self.data))
    }
}

/// CRC32 over the canonical JSON encoding of `fields`
///
/// `serde_json::Map` keeps keys sorted, so equal content always produces the
/// same bytes regardless of insertion order.
pub fn checksum(fields: &Fields) -> String {
    let bytes = serde_json::to_vec(fields).unwrap_or_default();
    format!("{:08x}", crc32fast::hash(&bytes))
}

/// Shallow-merge `patch` into `base`; the reserved version field is ignored
pub fn merge(base: &Fields, patch: &Fields) -> Fields {
    let mut merged = base.clone();
    for (key, value) in patch {
        if key != VERSION_FIELD {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Apply `patch` if the stored version equals `expected`
pub fn apply_patch(
    current: Option<&Value>,
    patch: &Fields,
    expected: u64,
    actor: &str,
    now: DateTime<Utc>,
) -> TxnDecision {
    let Ok(Some(record)) = Versioned::from_value(current) else {
        return TxnDecision::Abort;
    };
    if record.current_version() != expected {
        return TxnDecision::Abort;
    }
    let data = merge(&record.data, patch);
    let version = VersionInfo::stamp(expected.saturating_add(1), &data, actor, now);
    let updated = Versioned {
        data,
        version: Some(version),
    };
    TxnDecision::Commit(Some(updated.to_value()))
}

/// Write `data` as version 1 unless something is already stored
pub fn create(
    current: Option<&Value>,
    data: &Fields,
    actor: &str,
    now: DateTime<Utc>,
) -> TxnDecision {
    if current.is_some_and(|v| !v.is_null()) {
        return TxnDecision::Abort;
    }
    let mut data = data.clone();
    data.remove(VERSION_FIELD);
    let version = VersionInfo::stamp(1, &data, actor, now);
    let record = Versioned {
        data,
        version: Some(version),
    };
    TxnDecision::Commit(Some(record.to_value()))
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
