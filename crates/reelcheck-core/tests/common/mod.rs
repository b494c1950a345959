// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for reelcheck-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use reelcheck_core::{NewRun, PostgresRunStore, RunStatus, RunStore, SqliteRunStore};
use uuid::Uuid;

pub const OWNER: &str = "owner-1";

/// Fresh in-memory SQLite store.
pub async fn sqlite_store() -> Arc<SqliteRunStore> {
    Arc::new(
        SqliteRunStore::in_memory()
            .await
            .expect("Failed to create in-memory store"),
    )
}

/// File-backed SQLite store with a real connection pool.
pub async fn sqlite_file_store(dir: &tempfile::TempDir) -> Arc<SqliteRunStore> {
    Arc::new(
        SqliteRunStore::from_path(dir.path().join("runs.db"))
            .await
            .expect("Failed to create file store"),
    )
}

/// PostgreSQL store from TEST_REELCHECK_DATABASE_URL, if set.
pub async fn postgres_store() -> Option<Arc<PostgresRunStore>> {
    let url = std::env::var("TEST_REELCHECK_DATABASE_URL").ok()?;
    let store = PostgresRunStore::connect(&url, 10)
        .await
        .expect("Failed to connect to test database");
    Some(Arc::new(store))
}

/// Unique run id so Postgres tests don't collide across runs.
pub fn run_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub fn upload(id: &str) -> NewRun {
    NewRun {
        id: Some(id.to_string()),
        owner_id: OWNER.to_string(),
        video_path: Some(format!("uploads/{}.mp4", id)),
        video_size_bytes: Some(4 * 1024 * 1024),
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

#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_REELCHECK_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_REELCHECK_DATABASE_URL not set");
            return;
        }
    };
}
