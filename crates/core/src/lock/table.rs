// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stored lock entries and the pure decisions applied to them
//!
//! Every function returning a [`TxnDecision`] runs inside a store transaction,
//! may be invoked several times, and depends only on its arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tether_store::TxnDecision;

/// Identifier of one acquisition attempt
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(pub String);

impl LockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A granted lease on a resource, as stored
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub id: LockId,
    pub resource: String,
    pub owner: String,
    /// Epoch millis
    pub acquired_at: u64,
    /// Epoch millis; the lease is valid strictly before this instant
    pub expires_at: u64,
    #[serde(default)]
    pub renew_count: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Lock {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Milliseconds left on the lease
    pub fn remaining_millis(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// All locks stored for one resource, keyed by lock id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockTable {
    entries: BTreeMap<LockId, Lock>,
}

impl LockTable {
    /// Decode a stored lock map; a missing path is an empty table
    pub fn from_value(value: Option<&Value>) -> Result<Self, serde_json::Error> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(v) => Self::deserialize(v),
        }
    }

    /// Encode for storage; an empty table deletes the path
    pub fn to_value(&self) -> Option<Value> {
        if self.entries.is_empty() {
            None
        } else {
            // String-keyed maps of plain structs always serialize
            serde_json::to_value(self).ok()
        }
    }

    pub fn get(&self, id: &LockId) -> Option<&Lock> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, lock: Lock) {
        self.entries.insert(lock.id.clone(), lock);
    }

    /// Unexpired locks
    pub fn active(&self, now: u64) -> impl Iterator<Item = &Lock> {
        self.entries.values().filter(move |l| !l.is_expired(now))
    }

    pub fn active_count(&self, now: u64) -> usize {
        self.active(now).count()
    }

    /// Remove expired locks, returning them
    pub fn prune_expired(&mut self, now: u64) -> Vec<Lock> {
        let expired: Vec<LockId> = self
            .entries
            .values()
            .filter(|l| l.is_expired(now))
            .map(|l| l.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }
}

/// Prune expired entries and insert `lock` if the resource still has room
pub fn admit(current: Option<&Value>, lock: &Lock, max_concurrent: usize, now: u64) -> TxnDecision {
    let Ok(mut table) = LockTable::from_value(current) else {
        return TxnDecision::Abort;
    };
    table.prune_expired(now);
    if table.active_count(now) >= max_concurrent {
        return TxnDecision::Abort;
    }
    table.insert(lock.clone());
    TxnDecision::Commit(table.to_value())
}

/// Extend a lock owned by `owner`; aborts if it is gone or owned by someone else
///
/// A lapsed entry that nobody has pruned yet is still extended, so a renewal
/// does not prove the lease never lapsed. The new deadline always moves past
/// the old one, even within the same millisecond.
pub fn extend(
    current: Option<&Value>,
    id: &LockId,
    owner: &str,
    ttl_millis: u64,
    now: u64,
) -> TxnDecision {
    let Ok(mut table) = LockTable::from_value(current) else {
        return TxnDecision::Abort;
    };
    let Some(existing) = table.get(id) else {
        return TxnDecision::Abort;
    };
    if existing.owner != owner {
        return TxnDecision::Abort;
    }
    let mut renewed = existing.clone();
    renewed.expires_at = now
        .saturating_add(ttl_millis)
        .max(existing.expires_at.saturating_add(1));
    renewed.renew_count = renewed.renew_count.saturating_add(1);
    table.insert(renewed);
    TxnDecision::Commit(table.to_value())
}

/// Remove a lock owned by `owner`; aborts if it is gone or owned by someone else
pub fn remove(current: Option<&Value>, id: &LockId, owner: &str) -> TxnDecision {
    let Ok(mut table) = LockTable::from_value(current) else {
        return TxnDecision::Abort;
    };
    match table.get(id) {
        Some(existing) if existing.owner == owner => {
            table.entries.remove(id);
            TxnDecision::Commit(table.to_value())
        }
        _ => TxnDecision::Abort,
    }
}

/// Drop every expired lock; aborts when nothing expired
pub fn sweep(current: Option<&Value>, now: u64) -> TxnDecision {
    let Ok(mut table) = LockTable::from_value(current) else {
        return TxnDecision::Abort;
    };
    if table.prune_expired(now).is_empty() {
        return TxnDecision::Abort;
    }
    TxnDecision::Commit(table.to_value())
}

/// A pending acquisition attempt waiting for its turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: LockId,
    pub owner: String,
    /// Epoch millis
    pub enqueued_at: u64,
    /// Epoch millis after which the attempt has given up
    pub deadline: u64,
}

/// FIFO of pending attempts for one resource
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockQueue {
    entries: Vec<QueueEntry>,
}

impl LockQueue {
    pub fn from_value(value: Option<&Value>) -> Result<Self, serde_json::Error> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(v) => Self::deserialize(v),
        }
    }

    pub fn to_value(&self) -> Option<Value> {
        if self.entries.is_empty() {
            None
        } else {
            serde_json::to_value(self).ok()
        }
    }

    pub fn position(&self, id: &LockId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<LockId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Drop attempts whose deadline has passed; returns whether any were dropped
    fn prune_abandoned(&mut self, now: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.deadline > now);
        self.entries.len() != before
    }
}

/// Append `entry` once, pruning abandoned attempts on the way
pub fn enqueue(current: Option<&Value>, entry: &QueueEntry, now: u64) -> TxnDecision {
    let Ok(mut queue) = LockQueue::from_value(current) else {
        return TxnDecision::Abort;
    };
    let pruned = queue.prune_abandoned(now);
    if queue.position(&entry.id).is_some() {
        return if pruned {
            TxnDecision::Commit(queue.to_value())
        } else {
            TxnDecision::Abort
        };
    }
    queue.entries.push(entry.clone());
    TxnDecision::Commit(queue.to_value())
}

/// Remove `id` from the queue, pruning abandoned attempts on the way
pub fn dequeue(current: Option<&Value>, id: &LockId, now: u64) -> TxnDecision {
    let Ok(mut queue) = LockQueue::from_value(current) else {
        return TxnDecision::Abort;
    };
    let pruned = queue.prune_abandoned(now);
    let before = queue.entries.len();
    queue.entries.retain(|e| &e.id != id);
    if !pruned && queue.entries.len() == before {
        return TxnDecision::Abort;
    }
    TxnDecision::Commit(queue.to_value())
}

/// Prune abandoned attempts; aborts when there is nothing to prune
pub fn tidy_queue(current: Option<&Value>, now: u64) -> TxnDecision {
    let Ok(mut queue) = LockQueue::from_value(current) else {
        return TxnDecision::Abort;
    };
    if queue.prune_abandoned(now) {
        TxnDecision::Commit(queue.to_value())
    } else {
        TxnDecision::Abort
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
