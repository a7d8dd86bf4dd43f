// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{MemoryStore, TxnDecision};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// A writer that captures log output for testing
#[derive(Clone, Default)]
struct CapturedLogs {
    logs: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn contents(&self) -> String {
        let logs = self.logs.lock().unwrap();
        String::from_utf8_lossy(&logs).to_string()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.logs.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run a test with captured tracing output
fn with_tracing<F, Fut>(f: F) -> (String, Fut::Output)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future,
{
    let logs = CapturedLogs::default();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f())
    });

    (logs.contents(), result)
}

#[test]
fn traced_transact_logs_span_and_commit() {
    let store = TracedStore::new(MemoryStore::new());

    let (logs, outcome) = with_tracing(|| async {
        store
            .transact("locks/order-42", &|_| {
                TxnDecision::Commit(Some(json!({"held": true})))
            })
            .await
    });

    assert!(outcome.unwrap().committed);
    assert!(logs.contains("store.transact"), "logs: {logs}");
    assert!(logs.contains("locks/order-42"), "logs: {logs}");
    assert!(logs.contains("committed=true"), "logs: {logs}");
}

#[test]
fn traced_get_logs_failure() {
    let memory = MemoryStore::new();
    memory.set_unavailable(true);
    let store = TracedStore::new(memory);

    let (logs, result) = with_tracing(|| async { store.get("records/1").await });

    assert!(result.is_err());
    assert!(logs.contains("store operation failed"), "logs: {logs}");
    assert!(logs.contains("store unavailable"), "logs: {logs}");
}

#[tokio::test]
async fn traced_store_passes_values_through() {
    let store = TracedStore::new(MemoryStore::new());
    store.set("a/b", json!(3)).await.unwrap();

    assert_eq!(store.get("a/b").await.unwrap(), Some(json!(3)));
    assert_eq!(store.list("a").await.unwrap(), vec!["a/b".to_string()]);

    store.delete("a/b").await.unwrap();
    assert_eq!(store.inner().get("a/b").await.unwrap(), None);
}
