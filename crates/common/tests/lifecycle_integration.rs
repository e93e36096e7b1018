//! Integration tests for managed background tasks

#![cfg(all(feature = "runtime", feature = "test-utils"))]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flagsync_common::{ManagedTask, TaskError};

/// A periodic loop ticks until stopped and stops deterministically.
#[tokio::test(flavor = "multi_thread")]
async fn periodic_loop_stops_on_request() {
    let ticks = Arc::new(AtomicU32::new(0));
    let task = ManagedTask::new("ticker");

    let counter = Arc::clone(&ticks);
    task.spawn(move |cancel| async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(Duration::from_millis(5)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    })
    .unwrap();

    flagsync_common::assert_eventually_async!(Duration::from_secs(1), async {
        ticks.load(Ordering::SeqCst) >= 3
    });

    task.stop().await.unwrap();
    let after_stop = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
}

/// Concurrent start attempts: exactly one wins.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_spawns_single_winner() {
    let task = Arc::new(ManagedTask::new("contended"));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let task = Arc::clone(&task);
        handles.push(tokio::spawn(async move {
            task.spawn(|cancel| async move { cancel.cancelled().await }).is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    task.stop().await.unwrap();
    assert_eq!(task.stop().await, Err(TaskError::NotRunning { name: "contended" }));
}
