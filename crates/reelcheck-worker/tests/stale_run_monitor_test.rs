// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stale run monitor tests.
//!
//! Checks run with `check_at` in the future instead of waiting out real
//! timeouts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use reelcheck_core::{ClaimCoordinator, RunStatus, RunStore, StaleSweep};
use reelcheck_worker::stale_run_monitor::{StaleRunMonitor, StaleRunMonitorConfig};

fn config(max_attempts: i32) -> StaleRunMonitorConfig {
    StaleRunMonitorConfig {
        check_interval: Duration::from_secs(60),
        stale_timeout: Duration::from_secs(600),
        max_attempts,
        cancel_grace: Duration::from_secs(300),
    }
}

fn an_hour_from_now() -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::hours(1)
}

#[tokio::test]
async fn test_abandoned_run_is_requeued_then_failed() {
    let store = store().await;
    queued_run(store.as_ref(), "r1").await;
    let coordinator = ClaimCoordinator::new(store.clone());
    let first = coordinator.try_claim("r1", "w1").await.unwrap().unwrap();

    let monitor = StaleRunMonitor::new(store.clone(), config(2));

    let check = monitor.check_at(an_hour_from_now()).await.unwrap();
    assert_eq!(
        check.sweep,
        StaleSweep {
            requeued: 1,
            failed: 0,
            cancelled: 0
        }
    );
    let run = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Queued);
    assert!(run.claimed_by.is_none());

    let second = coordinator.try_claim("r1", "w2").await.unwrap().unwrap();
    assert_eq!(second.attempt, first.attempt + 1);

    // The first worker wakes up and reports; its attempt is fenced out.
    assert!(
        !store
            .update_progress("r1", first.attempt, 50, Some("late"))
            .await
            .unwrap()
    );

    let check = monitor.check_at(an_hour_from_now()).await.unwrap();
    assert_eq!(check.sweep.failed, 1);
    let run = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.is_some());
}

#[tokio::test]
async fn test_fresh_runs_are_left_alone() {
    let store = store().await;
    queued_run(store.as_ref(), "r1").await;
    ClaimCoordinator::new(store.clone())
        .try_claim("r1", "w1")
        .await
        .unwrap()
        .unwrap();

    let monitor = StaleRunMonitor::new(store.clone(), config(3));
    let check = monitor.check_once().await.unwrap();

    assert_eq!(check.total(), 0);
    assert_eq!(
        store.get_run("r1").await.unwrap().unwrap().status,
        RunStatus::Processing
    );
}

#[tokio::test]
async fn test_unclaimed_cancellation_resolved_after_grace() {
    let store = store().await;
    queued_run(store.as_ref(), "r1").await;
    store.request_cancel("r1").await.unwrap();
    let monitor = StaleRunMonitor::new(store.clone(), config(3));

    assert_eq!(monitor.check_once().await.unwrap().unclaimed_cancelled, 0);

    let check = monitor.check_at(an_hour_from_now()).await.unwrap();
    assert_eq!(check.unclaimed_cancelled, 1);
    assert_eq!(
        store.get_run("r1").await.unwrap().unwrap().status,
        RunStatus::Cancelled
    );
}

#[tokio::test]
async fn test_monitor_loop_stops_on_shutdown() {
    let store = store().await;
    let store: Arc<dyn RunStore> = store;
    let monitor = StaleRunMonitor::new(store, config(3));
    let shutdown = monitor.shutdown_handle();

    let handle = tokio::spawn(async move { monitor.run().await });
    shutdown.notify_one();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("monitor should stop")
        .unwrap();
}
