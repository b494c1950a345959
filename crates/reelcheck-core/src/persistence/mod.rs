// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for reelcheck-core.
//!
//! The run store is the only shared mutable resource in the dispatch core.
//! Every status transition is a single conditional statement so that
//! concurrent callers (poll loops, push handlers, other worker processes)
//! cannot both win the same transition.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRunStore;
pub use self::sqlite::SqliteRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CoreError;
use crate::models::{FrameRecord, NewRun, Run, RunOutcome, RunStatus, StaleSweep, SummaryRecord};

/// Persistence interface for runs and their derived artifacts.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a run in `uploaded` status and return it.
    async fn create_run(&self, new_run: &NewRun) -> Result<Run, CoreError>;

    /// Fetch a run by id.
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, CoreError>;

    /// Move a run to `queued` if its status is one of `from`.
    ///
    /// Resets progress and error fields. Returns true if the row changed.
    async fn mark_queued(&self, run_id: &str, from: &[RunStatus]) -> Result<bool, CoreError>;

    /// Atomically move a run from `queued` to `processing`.
    ///
    /// Returns the new attempt number when this caller won the claim,
    /// `None` when the row was not `queued`.
    async fn claim(&self, run_id: &str, worker_id: &str) -> Result<Option<i32>, CoreError>;

    /// Oldest run currently in `queued`, if any.
    async fn oldest_queued_run_id(&self) -> Result<Option<String>, CoreError>;

    /// Set the cancel flag and move `queued`/`processing` runs to
    /// `cancel_requested`. Returns true if the row changed.
    async fn request_cancel(&self, run_id: &str) -> Result<bool, CoreError>;

    /// Re-queue a run in one of `from`, deleting its frames and summaries
    /// in the same transaction. Returns true if the row changed.
    async fn reset_for_retry(&self, run_id: &str, from: &[RunStatus]) -> Result<bool, CoreError>;

    /// Record progress for the given attempt and refresh its heartbeat.
    ///
    /// The stored percentage never decreases. Returns false if the attempt
    /// no longer owns the run.
    async fn update_progress(
        &self,
        run_id: &str,
        attempt: i32,
        percentage: i32,
        message: Option<&str>,
    ) -> Result<bool, CoreError>;

    /// Read the cancel flag.
    async fn is_cancel_requested(&self, run_id: &str) -> Result<bool, CoreError>;

    /// Store the analysis of a single frame for the given attempt.
    ///
    /// Returns false if the attempt no longer owns the run.
    async fn record_frame(
        &self,
        run_id: &str,
        attempt: i32,
        frame_index: i32,
        timestamp_ms: i64,
        analysis: &Value,
    ) -> Result<bool, CoreError>;

    /// Write the terminal state for an attempt.
    ///
    /// Only applies while the run is `processing` or `cancel_requested`
    /// and still owned by `attempt`. A pending cancel turns any outcome
    /// into `cancelled`. Returns the status written, or `None` if the
    /// attempt was superseded.
    async fn finish_run(
        &self,
        run_id: &str,
        attempt: i32,
        outcome: &RunOutcome,
    ) -> Result<Option<RunStatus>, CoreError>;

    /// Reclaim claimed runs whose heartbeat is older than `cutoff`.
    ///
    /// `processing` runs go back to `queued` while fewer than `max_attempts`
    /// claims were made since the run was last enqueued or retried,
    /// and fail otherwise. Claimed `cancel_requested` runs are cancelled.
    async fn reclaim_stale_runs(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<StaleSweep, CoreError>;

    /// Cancel `cancel_requested` runs that were never claimed and have not
    /// changed since `cutoff`. Returns the number of rows changed.
    async fn resolve_unclaimed_cancellations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    /// Frame results for a run, in frame order.
    async fn list_frames(&self, run_id: &str) -> Result<Vec<FrameRecord>, CoreError>;

    /// Summaries for a run (primary first).
    async fn list_summaries(&self, run_id: &str) -> Result<Vec<SummaryRecord>, CoreError>;

    /// Check store connectivity.
    async fn health_check(&self) -> Result<bool, CoreError>;
}

/// Map a failed run insert, reporting a taken id as a conflict.
pub(crate) fn duplicate_run(err: sqlx::Error, run_id: &str) -> CoreError {
    if crate::error::is_unique_violation(&err) {
        CoreError::Conflict {
            message: format!("Run '{}' already exists", run_id),
        }
    } else {
        err.into()
    }
}

/// Error message written when a stale run runs out of attempts.
pub(crate) fn stale_failure_message(max_attempts: i32) -> String {
    format!(
        "Processing stalled without a heartbeat after {} attempt(s)",
        max_attempts
    )
}

pub(crate) fn status_list(statuses: &[RunStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}
