// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL run store tests.
//!
//! Skipped unless TEST_REELCHECK_DATABASE_URL is set.

mod common;

use reelcheck_core::{RunLifecycle, RunOutcome, RunStatus, RunStore};
use serde_json::json;

use common::*;

#[tokio::test]
async fn test_full_cycle_with_retry() {
    skip_if_no_db!();
    let store = postgres_store().await.unwrap();
    assert!(store.health_check().await.unwrap());

    let lifecycle = RunLifecycle::new(store.clone());
    let id = run_id("pg");
    lifecycle.create_run(upload(&id)).await.unwrap();
    lifecycle.enqueue(OWNER, &id).await.unwrap();

    let attempt = store.claim(&id, "w1").await.unwrap().unwrap();
    assert!(store.update_progress(&id, attempt, 30, Some("extracting")).await.unwrap());
    assert!(store.update_progress(&id, attempt, 10, None).await.unwrap());
    assert!(
        store
            .record_frame(&id, attempt, 0, 0, &json!({"contrast": "pass"}))
            .await
            .unwrap()
    );

    let run = store.get_run(&id).await.unwrap().unwrap();
    assert_eq!(run.progress_percentage, 30);

    let written = store
        .finish_run(
            &id,
            attempt,
            &RunOutcome::Completed {
                summary: json!({"score": 9}),
                shadow_summary: Some(json!({"score": 8})),
            },
        )
        .await
        .unwrap();
    assert_eq!(written, Some(RunStatus::Completed));

    let report = lifecycle.report(OWNER, &id).await.unwrap();
    assert_eq!(report.frames.len(), 1);
    assert_eq!(report.summaries.len(), 2);
    assert_eq!(report.summaries[0].kind, "primary");

    let t = lifecycle.retry(OWNER, &id).await.unwrap();
    assert_eq!(t.run.status, RunStatus::Queued);
    assert_eq!(t.run.progress_percentage, 0);
    assert!(store.list_frames(&id).await.unwrap().is_empty());
    assert!(store.list_summaries(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_flag_turns_failure_into_cancelled() {
    skip_if_no_db!();
    let store = postgres_store().await.unwrap();
    let lifecycle = RunLifecycle::new(store.clone());
    let id = run_id("pg-cancel");
    lifecycle.create_run(upload(&id)).await.unwrap();
    lifecycle.enqueue(OWNER, &id).await.unwrap();
    let attempt = store.claim(&id, "w1").await.unwrap().unwrap();

    lifecycle.cancel(OWNER, &id).await.unwrap();
    assert!(store.is_cancel_requested(&id).await.unwrap());

    let written = store
        .finish_run(
            &id,
            attempt,
            &RunOutcome::Failed {
                error: "interrupted".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(written, Some(RunStatus::Cancelled));

    let run = store.get_run(&id).await.unwrap().unwrap();
    assert!(run.error_message.is_none());
}

#[tokio::test]
async fn test_missing_run_cancel_flag_is_not_found() {
    skip_if_no_db!();
    let store = postgres_store().await.unwrap();
    let err = store.is_cancel_requested(&run_id("missing")).await.unwrap_err();
    assert_eq!(err.error_code(), "RUN_NOT_FOUND");
}
