// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn lock(id: &str, owner: &str, acquired_at: u64, expires_at: u64) -> Lock {
    Lock {
        id: LockId::new(id),
        resource: "order-42".to_string(),
        owner: owner.to_string(),
        acquired_at,
        expires_at,
        renew_count: 0,
        metadata: BTreeMap::new(),
    }
}

fn committed(decision: TxnDecision) -> Option<Value> {
    match decision {
        TxnDecision::Commit(value) => value,
        TxnDecision::Abort => panic!("expected commit"),
    }
}

fn table_of(value: Option<Value>) -> LockTable {
    LockTable::from_value(value.as_ref()).unwrap()
}

#[test]
fn lock_expires_exactly_at_deadline() {
    let l = lock("a", "worker-1", 0, 1_000);
    assert!(!l.is_expired(999));
    assert!(l.is_expired(1_000));
    assert_eq!(l.remaining_millis(400), 600);
    assert_eq!(l.remaining_millis(5_000), 0);
}

#[test]
fn stored_lock_uses_camel_case() {
    let value = serde_json::to_value(lock("a", "worker-1", 10, 20)).unwrap();
    assert_eq!(value["expiresAt"], json!(20));
    assert_eq!(value["renewCount"], json!(0));
    assert_eq!(value["id"], json!("a"));
}

#[test]
fn admit_into_empty_resource_commits() {
    let new = lock("a", "worker-1", 100, 1_100);
    let table = table_of(committed(admit(None, &new, 1, 100)));
    assert_eq!(table.get(&LockId::new("a")), Some(&new));
}

#[test]
fn admit_aborts_when_resource_is_full() {
    let held = table_of(committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0)));
    let decision = admit(held.to_value().as_ref(), &lock("b", "w2", 10, 1_010), 1, 10);
    assert_eq!(decision, TxnDecision::Abort);
}

#[test]
fn admit_prunes_expired_before_counting() {
    let held = table_of(committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0)));
    let table = table_of(committed(admit(
        held.to_value().as_ref(),
        &lock("b", "w2", 1_000, 2_000),
        1,
        1_000,
    )));
    assert!(table.get(&LockId::new("a")).is_none());
    assert!(table.get(&LockId::new("b")).is_some());
}

#[test]
fn admit_respects_max_concurrent() {
    let mut value = None;
    for id in ["a", "b", "c"] {
        value = committed(admit(value.as_ref(), &lock(id, id, 0, 1_000), 3, 0));
    }
    assert_eq!(table_of(value.clone()).len(), 3);
    assert_eq!(
        admit(value.as_ref(), &lock("d", "d", 0, 1_000), 3, 0),
        TxnDecision::Abort
    );
}

#[test]
fn admit_aborts_on_corrupt_table() {
    let corrupt = json!("not a map");
    assert_eq!(
        admit(Some(&corrupt), &lock("a", "w1", 0, 1), 1, 0),
        TxnDecision::Abort
    );
}

#[test]
fn extend_pushes_deadline_and_counts() {
    let value = committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0));
    let table = table_of(committed(extend(value.as_ref(), &LockId::new("a"), "w1", 1_000, 600)));
    let renewed = table.get(&LockId::new("a")).unwrap();
    assert_eq!(renewed.expires_at, 1_600);
    assert_eq!(renewed.renew_count, 1);
}

#[test]
fn extend_in_grant_millisecond_still_moves_deadline() {
    let value = committed(admit(None, &lock("a", "w1", 600, 1_600), 1, 600));
    let once = committed(extend(value.as_ref(), &LockId::new("a"), "w1", 1_000, 600));
    let twice = committed(extend(once.as_ref(), &LockId::new("a"), "w1", 1_000, 600));

    assert_eq!(table_of(once).get(&LockId::new("a")).unwrap().expires_at, 1_601);
    let renewed = table_of(twice);
    let renewed = renewed.get(&LockId::new("a")).unwrap();
    assert_eq!(renewed.expires_at, 1_602);
    assert_eq!(renewed.renew_count, 2);
}

#[test]
fn extend_revives_unpruned_lapsed_entry() {
    let value = committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0));
    let table = table_of(committed(extend(value.as_ref(), &LockId::new("a"), "w1", 1_000, 1_500)));
    assert_eq!(table.get(&LockId::new("a")).unwrap().expires_at, 2_500);
}

#[test]
fn extend_by_non_owner_aborts() {
    let value = committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0));
    assert_eq!(
        extend(value.as_ref(), &LockId::new("a"), "w2", 1_000, 600),
        TxnDecision::Abort
    );
}

#[test]
fn extend_missing_lock_aborts() {
    assert_eq!(
        extend(None, &LockId::new("a"), "w1", 1_000, 0),
        TxnDecision::Abort
    );
}

#[test]
fn remove_last_lock_deletes_path() {
    let value = committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0));
    assert_eq!(
        remove(value.as_ref(), &LockId::new("a"), "w1"),
        TxnDecision::Commit(None)
    );
}

#[test]
fn remove_keeps_other_locks() {
    let mut value = None;
    for id in ["a", "b"] {
        value = committed(admit(value.as_ref(), &lock(id, id, 0, 1_000), 2, 0));
    }
    let table = table_of(committed(remove(value.as_ref(), &LockId::new("a"), "a")));
    assert_eq!(table.len(), 1);
    assert!(table.get(&LockId::new("b")).is_some());
}

#[test]
fn remove_by_non_owner_aborts() {
    let value = committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0));
    assert_eq!(
        remove(value.as_ref(), &LockId::new("a"), "w2"),
        TxnDecision::Abort
    );
}

#[test]
fn sweep_aborts_when_nothing_expired() {
    let value = committed(admit(None, &lock("a", "w1", 0, 1_000), 1, 0));
    assert_eq!(sweep(value.as_ref(), 500), TxnDecision::Abort);
    assert_eq!(sweep(value.as_ref(), 1_000), TxnDecision::Commit(None));
}

fn entry(id: &str, deadline: u64) -> QueueEntry {
    QueueEntry {
        id: LockId::new(id),
        owner: format!("owner-{id}"),
        enqueued_at: 0,
        deadline,
    }
}

#[test]
fn enqueue_appends_in_order_and_only_once() {
    let mut value = None;
    for id in ["a", "b", "c"] {
        value = committed(enqueue(value.as_ref(), &entry(id, 10_000), 0));
    }
    assert_eq!(enqueue(value.as_ref(), &entry("b", 10_000), 0), TxnDecision::Abort);

    let queue = LockQueue::from_value(value.as_ref()).unwrap();
    assert_eq!(
        queue.ids(),
        vec![LockId::new("a"), LockId::new("b"), LockId::new("c")]
    );
    assert_eq!(queue.position(&LockId::new("c")), Some(2));
}

#[test]
fn dequeue_removes_entry_and_empty_queue_deletes_path() {
    let value = committed(enqueue(None, &entry("a", 10_000), 0));
    assert_eq!(
        dequeue(value.as_ref(), &LockId::new("a"), 0),
        TxnDecision::Commit(None)
    );
    assert_eq!(dequeue(None, &LockId::new("a"), 0), TxnDecision::Abort);
}

#[test]
fn abandoned_entries_are_pruned() {
    let mut value = None;
    value = committed(enqueue(value.as_ref(), &entry("crashed", 100), 0));
    value = committed(enqueue(value.as_ref(), &entry("live", 10_000), 0));

    assert_eq!(tidy_queue(value.as_ref(), 50), TxnDecision::Abort);
    let queue = LockQueue::from_value(committed(tidy_queue(value.as_ref(), 100)).as_ref()).unwrap();
    assert_eq!(queue.position(&LockId::new("live")), Some(0));
}

proptest! {
    #[test]
    fn renewals_strictly_increase_deadline(
        steps in proptest::collection::vec(0u64..50, 1..20),
        ttl in 1u64..100,
    ) {
        let mut now = 0;
        let mut value = committed(admit(None, &lock("a", "w", 0, ttl), 1, 0));
        let mut previous = ttl;
        for step in steps {
            now += step;
            value = committed(extend(value.as_ref(), &LockId::new("a"), "w", ttl, now));
            let table = LockTable::from_value(value.as_ref()).unwrap();
            let expires_at = table.get(&LockId::new("a")).unwrap().expires_at;
            prop_assert!(expires_at > previous);
            prop_assert!(expires_at >= now + ttl);
            previous = expires_at;
        }
    }

    #[test]
    fn pruning_leaves_only_unexpired_locks(
        deadlines in proptest::collection::vec(0u64..2_000, 0..20),
        now in 0u64..2_000,
    ) {
        let mut table = LockTable::default();
        for (i, expires_at) in deadlines.iter().enumerate() {
            table.insert(lock(&format!("l{i}"), "w", 0, *expires_at));
        }
        let active_before = table.active_count(now);
        let pruned = table.prune_expired(now);

        prop_assert!(pruned.iter().all(|l| l.is_expired(now)));
        prop_assert_eq!(table.len(), active_before);
        prop_assert_eq!(table.active_count(now), table.len());
    }

    #[test]
    fn admit_never_exceeds_limit(
        max in 1usize..4,
        attempts in 1usize..10,
    ) {
        let mut value: Option<Value> = None;
        for i in 0..attempts {
            let candidate = lock(&format!("l{i}"), "w", 0, 1_000);
            if let TxnDecision::Commit(next) = admit(value.as_ref(), &candidate, max, 0) {
                value = next;
            }
            let table = LockTable::from_value(value.as_ref()).unwrap();
            prop_assert!(table.active_count(0) <= max);
        }
    }
}
