// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the embedded worker runtime over real sockets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use reelcheck_core::{RunLifecycle, RunNotifier, RunStatus, RunStore};
use reelcheck_worker::engine::MockEngine;
use reelcheck_worker::notifier::WebhookNotifier;
use reelcheck_worker::runtime::{WorkerRuntime, WorkerRuntimeBuilder};
use reelcheck_worker::server::dispatch::HealthResponse;

/// Queue a run after the poller's immediate first tick has passed, so
/// only the push path can pick it up.
async fn queue_after_first_tick(store: &dyn RunStore, id: &str) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    queued_run(store, id).await;
}

fn builder(store: Arc<dyn RunStore>, engine: Arc<MockEngine>) -> WorkerRuntimeBuilder {
    WorkerRuntime::builder()
        .store(store)
        .engine(engine)
        .webhook_secret(SECRET)
        .worker_id(WORKER_ID)
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .poll_interval(Duration::from_secs(3600))
        .stale_monitor(None)
}

#[tokio::test]
async fn test_build_requires_store_engine_and_secret() {
    assert!(WorkerRuntime::builder().build().is_err());

    let store = store().await;
    assert!(
        WorkerRuntime::builder()
            .store(store.clone())
            .engine(Arc::new(MockEngine::new()))
            .build()
            .is_err()
    );
    assert!(
        builder(store, Arc::new(MockEngine::new()))
            .nonce_ttl(Duration::from_secs(60))
            .clock_skew(Duration::from_secs(60))
            .build()
            .is_err()
    );
}

#[tokio::test]
async fn test_health_over_http() {
    let store = store().await;
    let runtime = builder(store, Arc::new(MockEngine::new()))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(runtime.is_running());

    let health: HealthResponse = reqwest::get(format!("http://{}/health", runtime.local_addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.worker_id, WORKER_ID);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_notifier_push_reaches_runtime_and_completes_run() {
    let store = store().await;
    let runtime = builder(store.clone(), Arc::new(MockEngine::new()))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    queue_after_first_tick(store.as_ref(), "r1").await;

    let notifier = WebhookNotifier::new(
        format!("http://{}/process", runtime.local_addr()),
        SECRET,
        Duration::from_secs(5),
    )
    .unwrap();
    notifier.notify("r1").await.unwrap();

    wait_for_status(store.as_ref(), "r1", RunStatus::Completed).await;
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_enqueue_is_picked_up_by_poller() {
    let store = store().await;
    store.create_run(&upload("r1")).await.unwrap();
    let lifecycle = RunLifecycle::new(store.clone());
    let runtime = builder(store.clone(), Arc::new(MockEngine::new()))
        .poll_interval(Duration::from_millis(20))
        .lifecycle(lifecycle.clone())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    lifecycle.enqueue(OWNER, "r1").await.unwrap();

    wait_for_status(store.as_ref(), "r1", RunStatus::Completed).await;
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_pushed_runs() {
    let store = store().await;
    let engine = Arc::new(MockEngine::with_behavior(
        reelcheck_worker::engine::MockBehavior::Complete {
            frames: 5,
            frame_delay: Duration::from_millis(40),
        },
    ));
    let runtime = builder(store.clone(), engine)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    queue_after_first_tick(store.as_ref(), "r1").await;

    let response = reqwest::Client::new()
        .execute(
            signed_reqwest(
                &format!("http://{}/process", runtime.local_addr()),
                &process_body("r1"),
            ),
        )
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    runtime.shutdown().await.unwrap();

    let run = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

fn signed_reqwest(url: &str, body: &[u8]) -> reqwest::Request {
    use reelcheck_worker::webhook::{
        NONCE_HEADER, SECRET_HEADER, SIGNATURE_HEADER, SignedHeaders, TIMESTAMP_HEADER,
    };
    let signed = SignedHeaders::new(SECRET, chrono::Utc::now().timestamp(), body).unwrap();
    reqwest::Client::new()
        .post(url)
        .header(SECRET_HEADER, SECRET)
        .header(TIMESTAMP_HEADER, signed.timestamp)
        .header(NONCE_HEADER, signed.nonce)
        .header(SIGNATURE_HEADER, signed.signature)
        .body(body.to_vec())
        .build()
        .unwrap()
}
