// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fallback poller tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use reelcheck_core::{ClaimCoordinator, RunStatus, RunStore};
use reelcheck_worker::engine::MockEngine;
use reelcheck_worker::executor::RunExecutor;
use reelcheck_worker::poller::{Poller, PollerConfig, TickOutcome};

fn poller(store: Arc<dyn RunStore>, engine: Arc<MockEngine>, interval: Duration) -> Poller {
    Poller::new(
        ClaimCoordinator::new(store.clone()),
        RunExecutor::new(store, engine),
        PollerConfig {
            poll_interval: interval,
            worker_id: WORKER_ID.to_string(),
        },
    )
}

#[tokio::test]
async fn test_tick_with_nothing_queued_is_idle() {
    let store = store().await;
    store.create_run(&upload("r1")).await.unwrap();
    let engine = Arc::new(MockEngine::new());
    let poller = poller(store, engine.clone(), Duration::from_secs(60));

    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Idle);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_tick_processes_oldest_queued_run() {
    let store = store().await;
    queued_run(store.as_ref(), "older").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    queued_run(store.as_ref(), "newer").await;
    let engine = Arc::new(MockEngine::new());
    let poller = poller(store.clone(), engine.clone(), Duration::from_secs(60));

    assert_eq!(
        poller.tick().await.unwrap(),
        TickOutcome::Processed("older".to_string())
    );
    assert_eq!(
        poller.tick().await.unwrap(),
        TickOutcome::Processed("newer".to_string())
    );
    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Idle);

    for id in ["older", "newer"] {
        let run = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.claimed_by.as_deref(), Some(WORKER_ID));
    }
}

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let store = store().await;
    queued_run(store.as_ref(), "r1").await;
    queued_run(store.as_ref(), "r2").await;
    let engine = Arc::new(MockEngine::until_cancelled());
    let poller = Arc::new(poller(store.clone(), engine.clone(), Duration::from_secs(60)));

    let first = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.tick().await })
    };
    while engine.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(poller.is_busy());

    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Skipped);
    assert_eq!(
        store.get_run("r2").await.unwrap().unwrap().status,
        RunStatus::Queued
    );

    store.request_cancel("r1").await.unwrap();
    assert_eq!(
        first.await.unwrap().unwrap(),
        TickOutcome::Processed("r1".to_string())
    );
    assert!(!poller.is_busy());
    assert_eq!(engine.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_queued_cancellation_is_never_claimed() {
    let store = store().await;
    queued_run(store.as_ref(), "r1").await;
    store.request_cancel("r1").await.unwrap();
    let engine = Arc::new(MockEngine::new());
    let poller = poller(store.clone(), engine.clone(), Duration::from_secs(60));

    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Idle);
    assert!(engine.calls().is_empty());
    assert_eq!(
        store.get_run("r1").await.unwrap().unwrap().status,
        RunStatus::CancelRequested
    );
}

#[tokio::test]
async fn test_run_loop_picks_up_work_and_stops() {
    let store = store().await;
    let engine = Arc::new(MockEngine::new());
    let poller = poller(store.clone(), engine, Duration::from_millis(20));
    let shutdown = poller.shutdown_handle();
    let handle = tokio::spawn(async move { poller.run().await });

    queued_run(store.as_ref(), "r1").await;
    wait_for_status(store.as_ref(), "r1", RunStatus::Completed).await;

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller should stop")
        .unwrap();
}

#[tokio::test]
async fn test_store_outage_fails_tick_and_releases_busy_flag() {
    let store = Arc::new(FailingStore::default());
    let engine = Arc::new(MockEngine::new());
    let poller = poller(store.clone(), engine.clone(), Duration::from_secs(60));

    let err = poller.tick().await.unwrap_err();
    assert!(err.is_store_failure());
    assert!(!poller.is_busy());

    // The next tick tries again instead of reporting Skipped.
    assert!(poller.tick().await.is_err());
    assert_eq!(store.calls(), 2);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_run_loop_survives_store_outage_and_stops() {
    let store = Arc::new(FailingStore::default());
    let poller = poller(
        store.clone(),
        Arc::new(MockEngine::new()),
        Duration::from_millis(10),
    );
    let shutdown = poller.shutdown_handle();
    let handle = tokio::spawn(async move { poller.run().await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.calls() < 3 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "poller stopped ticking after a store error"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!handle.is_finished());

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller should stop")
        .unwrap();
}
