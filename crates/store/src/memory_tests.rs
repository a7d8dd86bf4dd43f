// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[tokio::test]
async fn get_missing_path_returns_none() {
    let store = MemoryStore::new();
    assert_eq!(store.get("locks/a").await.unwrap(), None);
}

#[tokio::test]
async fn set_then_get_roundtrips() {
    let store = MemoryStore::new();
    store.set("records/1", json!({"n": 1})).await.unwrap();
    assert_eq!(store.get("records/1").await.unwrap(), Some(json!({"n": 1})));
}

#[tokio::test]
async fn delete_missing_path_succeeds() {
    let store = MemoryStore::new();
    store.delete("nothing/here").await.unwrap();
}

#[tokio::test]
async fn transact_commit_writes_value() {
    let store = MemoryStore::new();
    let outcome = store
        .transact("counter", &|current| {
            let n = current.and_then(|v| v.as_u64()).unwrap_or(0);
            TxnDecision::Commit(Some(json!(n + 1)))
        })
        .await
        .unwrap();

    assert!(outcome.committed);
    assert_eq!(outcome.snapshot, Some(json!(1)));
    assert_eq!(store.get("counter").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn transact_abort_leaves_value_and_reports_snapshot() {
    let store = MemoryStore::new();
    store.set("counter", json!(7)).await.unwrap();

    let outcome = store
        .transact("counter", &|_| TxnDecision::Abort)
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert_eq!(outcome.snapshot, Some(json!(7)));
    assert_eq!(store.get("counter").await.unwrap(), Some(json!(7)));
}

#[tokio::test]
async fn transact_commit_none_deletes() {
    let store = MemoryStore::new();
    store.set("gone", json!(true)).await.unwrap();

    let outcome = store
        .transact("gone", &|_| TxnDecision::Commit(None))
        .await
        .unwrap();

    assert!(outcome.committed);
    assert_eq!(store.get("gone").await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_transactions_do_not_lose_increments() {
    let store = MemoryStore::new();
    store.set_latency(Some(Duration::from_millis(1)));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .transact("counter", &|current| {
                    let n = current.and_then(|v| v.as_u64()).unwrap_or(0);
                    TxnDecision::Commit(Some(json!(n + 1)))
                })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.get("counter").await.unwrap(), Some(json!(20)));
    assert_eq!(store.transaction_count(), 20);
}

#[tokio::test]
async fn list_returns_paths_below_prefix() {
    let store = MemoryStore::new();
    store.set("locks/a", json!({})).await.unwrap();
    store.set("locks/b/c", json!({})).await.unwrap();
    store.set("lock_queues/a", json!([])).await.unwrap();
    store.set("locksmith", json!({})).await.unwrap();

    let paths = store.list("locks").await.unwrap();
    assert_eq!(paths, vec!["locks/a".to_string(), "locks/b/c".to_string()]);
}

#[tokio::test]
async fn fail_next_injects_errors_then_recovers() {
    let store = MemoryStore::new();
    store.fail_next(2);

    assert!(matches!(
        store.get("x").await,
        Err(StoreError::Injected(_))
    ));
    assert!(matches!(
        store.set("x", json!(1)).await,
        Err(StoreError::Injected(_))
    ));
    store.set("x", json!(1)).await.unwrap();
}

#[tokio::test]
async fn unavailable_fails_until_cleared() {
    let store = MemoryStore::new();
    store.set_unavailable(true);

    assert!(matches!(
        store.transact("x", &|_| TxnDecision::Abort).await,
        Err(StoreError::Unavailable(_))
    ));

    store.set_unavailable(false);
    assert!(store.transact("x", &|_| TxnDecision::Abort).await.is_ok());
}

#[tokio::test]
async fn clones_share_data() {
    let a = MemoryStore::new();
    let b = a.clone();
    a.set("shared", json!("yes")).await.unwrap();
    assert_eq!(b.get("shared").await.unwrap(), Some(json!("yes")));
    assert_eq!(b.dump().len(), 1);
}
