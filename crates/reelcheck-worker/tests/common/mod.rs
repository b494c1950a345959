// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for reelcheck-worker integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use chrono::{DateTime, Utc};
use reelcheck_core::{
    ClaimCoordinator, CoreError, FrameRecord, NewRun, Run, RunLifecycle, RunOutcome, RunStatus,
    RunStore, SqliteRunStore, StaleSweep, SummaryRecord,
};
use serde_json::Value;
use reelcheck_worker::engine::AnalysisEngine;
use reelcheck_worker::executor::RunExecutor;
use reelcheck_worker::server::{self, AppState};
use reelcheck_worker::webhook::{
    NONCE_HEADER, NonceCache, SECRET_HEADER, SIGNATURE_HEADER, SignedHeaders, TIMESTAMP_HEADER,
    WebhookAuthenticator,
};

pub const SECRET: &str = "test-webhook-secret";
pub const OWNER: &str = "owner-1";
pub const WORKER_ID: &str = "worker-test";

pub async fn store() -> Arc<SqliteRunStore> {
    Arc::new(
        SqliteRunStore::in_memory()
            .await
            .expect("Failed to create in-memory store"),
    )
}

pub fn upload(id: &str) -> NewRun {
    NewRun {
        id: Some(id.to_string()),
        owner_id: OWNER.to_string(),
        video_path: Some(format!("uploads/{}.mp4", id)),
        video_size_bytes: Some(2 * 1024 * 1024),
        video_content_type: Some("video/mp4".to_string()),
    }
}

/// Insert a run and move it straight to `queued`.
pub async fn queued_run(store: &dyn RunStore, id: &str) {
    store.create_run(&upload(id)).await.expect("create_run");
    assert!(
        store
            .mark_queued(id, &[RunStatus::Uploaded])
            .await
            .expect("mark_queued")
    );
}

/// Store whose every call fails like an unreachable database.
#[derive(Default)]
pub struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    /// Number of store calls attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self, operation: &str) -> Result<T, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::Database {
            operation: operation.to_string(),
            details: "connection refused (os error 111)".to_string(),
        })
    }
}

#[async_trait]
impl RunStore for FailingStore {
    async fn create_run(&self, _new_run: &NewRun) -> Result<Run, CoreError> {
        self.fail("create_run")
    }

    async fn get_run(&self, _run_id: &str) -> Result<Option<Run>, CoreError> {
        self.fail("get_run")
    }

    async fn mark_queued(&self, _run_id: &str, _from: &[RunStatus]) -> Result<bool, CoreError> {
        self.fail("mark_queued")
    }

    async fn claim(&self, _run_id: &str, _worker_id: &str) -> Result<Option<i32>, CoreError> {
        self.fail("claim")
    }

    async fn oldest_queued_run_id(&self) -> Result<Option<String>, CoreError> {
        self.fail("oldest_queued_run_id")
    }

    async fn request_cancel(&self, _run_id: &str) -> Result<bool, CoreError> {
        self.fail("request_cancel")
    }

    async fn reset_for_retry(&self, _run_id: &str, _from: &[RunStatus]) -> Result<bool, CoreError> {
        self.fail("reset_for_retry")
    }

    async fn update_progress(
        &self,
        _run_id: &str,
        _attempt: i32,
        _percentage: i32,
        _message: Option<&str>,
    ) -> Result<bool, CoreError> {
        self.fail("update_progress")
    }

    async fn is_cancel_requested(&self, _run_id: &str) -> Result<bool, CoreError> {
        self.fail("is_cancel_requested")
    }

    async fn record_frame(
        &self,
        _run_id: &str,
        _attempt: i32,
        _frame_index: i32,
        _timestamp_ms: i64,
        _analysis: &Value,
    ) -> Result<bool, CoreError> {
        self.fail("record_frame")
    }

    async fn finish_run(
        &self,
        _run_id: &str,
        _attempt: i32,
        _outcome: &RunOutcome,
    ) -> Result<Option<RunStatus>, CoreError> {
        self.fail("finish_run")
    }

    async fn reclaim_stale_runs(
        &self,
        _cutoff: DateTime<Utc>,
        _max_attempts: i32,
    ) -> Result<StaleSweep, CoreError> {
        self.fail("reclaim_stale_runs")
    }

    async fn resolve_unclaimed_cancellations(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        self.fail("resolve_unclaimed_cancellations")
    }

    async fn list_frames(&self, _run_id: &str) -> Result<Vec<FrameRecord>, CoreError> {
        self.fail("list_frames")
    }

    async fn list_summaries(&self, _run_id: &str) -> Result<Vec<SummaryRecord>, CoreError> {
        self.fail("list_summaries")
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        self.fail("health_check")
    }
}

/// Router plus the state behind it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub fn app(
    store: Arc<dyn RunStore>,
    engine: Arc<dyn AnalysisEngine>,
    lifecycle: Option<RunLifecycle>,
) -> TestApp {
    let nonces = Arc::new(NonceCache::new(Duration::from_secs(600)));
    let state = AppState {
        worker_id: Arc::from(WORKER_ID),
        authenticator: Arc::new(WebhookAuthenticator::new(
            SECRET,
            Duration::from_secs(300),
            nonces,
        )),
        coordinator: ClaimCoordinator::new(store.clone()),
        executor: RunExecutor::new(store, engine),
    };
    TestApp {
        router: server::router(state.clone(), lifecycle),
        state,
    }
}

pub fn process_body(run_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "run_id": run_id })).expect("encode body")
}

/// A correctly signed `POST /process` with the current time.
pub fn signed_process(body: &[u8]) -> Request<Body> {
    let signed =
        SignedHeaders::new(SECRET, chrono::Utc::now().timestamp(), body).expect("sign body");
    process_request(SECRET, &signed, body)
}

pub fn process_request(secret: &str, signed: &SignedHeaders, body: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/process")
        .header("content-type", "application/json")
        .header(SECRET_HEADER, secret)
        .header(TIMESTAMP_HEADER, &signed.timestamp)
        .header(NONCE_HEADER, &signed.nonce)
        .header(SIGNATURE_HEADER, &signed.signature)
        .body(Body::from(body.to_vec()))
        .expect("build request")
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response is JSON")
}

/// Poll until the run reaches `status` or the timeout passes.
pub async fn wait_for_status(store: &dyn RunStore, run_id: &str, status: RunStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let run = store
            .get_run(run_id)
            .await
            .expect("get_run")
            .expect("run exists");
        if run.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run {} stuck in {:?}, expected {:?}",
            run_id,
            run.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
