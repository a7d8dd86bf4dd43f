// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

//! Lock manager behaviour across several managers sharing one store
//!
//! Each manager stands in for a separate process; they only see each other
//! through the coordination store.

mod common;

use common::{grant, init_tracing, lock_manager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::lock::{AcquireOutcome, LockConfig, ReleaseOutcome, RenewOutcome};
use tether_core::store::MemoryStore;
use tether_core::{Clock, FakeClock};
use tokio::time::Instant;

fn config() -> LockConfig {
    LockConfig::default()
        .with_ttl(Duration::from_secs(30))
        .with_acquire_timeout(Duration::from_secs(10))
        .with_retry_interval(Duration::from_millis(25))
        .with_auto_renew(false)
}

// =============================================================================
// Mutual exclusion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_holders_never_overlap() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let in_section = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let intervals = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for process in 0..3 {
        let (locks, _) = lock_manager(&format!("p{process}"), &store, &clock, config());
        for worker in 0..4 {
            let locks = locks.clone();
            let in_section = Arc::clone(&in_section);
            let peak = Arc::clone(&peak);
            let intervals = Arc::clone(&intervals);
            let owner = format!("worker-{process}-{worker}");
            tasks.push(tokio::spawn(async move {
                locks
                    .execute_with_lock("ledger", &owner, |_lock| async move {
                        let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        let start = Instant::now();
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        intervals.lock().unwrap().push((start, Instant::now()));
                        in_section.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let mut intervals = intervals.lock().unwrap().clone();
    assert_eq!(intervals.len(), 12);
    intervals.sort();
    for pair in intervals.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "hold intervals overlap: {pair:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn capacity_bounds_concurrent_grants() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let config = config()
        .with_max_concurrent_locks(2)
        .with_acquire_timeout(Duration::from_millis(200));
    let (a, _) = lock_manager("a", &store, &clock, config.clone());
    let (b, _) = lock_manager("b", &store, &clock, config.clone());
    let (c, _) = lock_manager("c", &store, &clock, config);

    grant(&a, "pool", "worker-a").await;
    grant(&b, "pool", "worker-b").await;
    let third = c.acquire("pool", "worker-c", Default::default()).await.unwrap();

    assert!(matches!(third, AcquireOutcome::TimedOut { .. }));
    assert_eq!(a.active_locks("pool").await.unwrap().len(), 2);
}

// =============================================================================
// Fairness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn fair_queue_grants_in_arrival_order() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let fair = config().with_fairness(true);

    let (holder, _) = lock_manager("h", &store, &clock, fair.clone());
    let held = grant(&holder, "printer", "holder").await;

    let order = Arc::new(Mutex::new(Vec::new()));
    // Slowest poller first, so arrival order differs from polling order
    let contenders = [("A", 70), ("B", 10), ("C", 30)];
    let mut tasks = Vec::new();
    for (name, retry_ms) in contenders {
        let config = fair
            .clone()
            .with_retry_interval(Duration::from_millis(retry_ms));
        let (locks, _) = lock_manager(name, &store, &clock, config);
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let lock = grant(&locks, "printer", name).await;
            order.lock().unwrap().push(name);
            tokio::time::sleep(Duration::from_millis(20)).await;
            locks.release(&lock.id).await.unwrap();
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(order.lock().unwrap().is_empty());
    holder.release(&held.id).await.unwrap();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    assert!(!store.dump().contains_key("lock_queues/printer"));
}

// =============================================================================
// Lease expiry and renewal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn expired_lease_is_taken_over_never_before_ttl() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let short = config()
        .with_ttl(Duration::from_secs(1))
        .with_acquire_timeout(Duration::from_millis(100));
    let (first, _) = lock_manager("a", &store, &clock, short.clone());
    let (second, _) = lock_manager("b", &store, &clock, short);

    let original = grant(&first, "report", "worker-a").await;

    clock.advance(Duration::from_millis(999));
    let early = second
        .acquire("report", "worker-b", Default::default())
        .await
        .unwrap();
    assert!(matches!(early, AcquireOutcome::TimedOut { .. }));

    clock.advance(Duration::from_millis(1));
    let takeover = grant(&second, "report", "worker-b").await;
    assert_eq!(takeover.acquired_at, original.expires_at);

    // The original holder finds its lease gone
    assert_eq!(first.renew(&original.id).await.unwrap(), RenewOutcome::Lost);
    assert!(first.held_locks().is_empty());
    assert_eq!(
        first.release(&original.id).await.unwrap(),
        ReleaseOutcome::Unknown
    );
    assert_eq!(second.active_locks("report").await.unwrap(), vec![takeover]);
}

#[tokio::test(start_paused = true)]
async fn renewals_extend_lease_monotonically() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let (locks, _) = lock_manager("a", &store, &clock, config());
    let lock = grant(&locks, "export", "worker-a").await;

    let mut previous = lock.clone();
    for step in 1..=4u32 {
        clock.advance(Duration::from_secs(u64::from(step)));
        let RenewOutcome::Renewed(renewed) = locks.renew(&lock.id).await.unwrap() else {
            panic!("renewal {step} should succeed");
        };
        assert!(renewed.expires_at > previous.expires_at);
        assert_eq!(renewed.expires_at, clock.now_millis() + 30_000);
        assert_eq!(renewed.renew_count, previous.renew_count + 1);
        previous = renewed;
    }

    let stored = locks.active_locks("export").await.unwrap();
    assert_eq!(stored, vec![previous]);
}

#[tokio::test(start_paused = true)]
async fn sweeper_clears_abandoned_leases_for_other_processes() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let (crashed, _) = lock_manager("a", &store, &clock, config());
    let (janitor, metrics) = lock_manager("b", &store, &clock, config());

    grant(&crashed, "inbox", "worker-a").await;
    grant(&crashed, "outbox", "worker-a").await;
    clock.advance(Duration::from_secs(31));

    let report = janitor.sweep_expired().await.unwrap();

    assert_eq!(report.locks_removed, 2);
    assert!(!janitor.is_locked("inbox").await.unwrap());
    assert_eq!(metrics.counter(tether_core::metrics::LOCK_EXPIRED, "inbox"), 1);
}
