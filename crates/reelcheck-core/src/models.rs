// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run data model.
//!
//! A run is one end-to-end analysis of an uploaded screen recording. The
//! `status` column is the single source of truth for ownership; the
//! `cancel_requested` flag is kept separately so an in-flight engine can
//! observe cancellation without racing status writes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a run.
///
/// ```text
///   uploaded ──enqueue──► queued ──claim──► processing ──► completed | failed
///                           │                  │
///                         cancel             cancel
///                           ▼                  ▼
///                      cancel_requested ──► cancelled
///
///   completed | failed | cancelled ──retry──► queued
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Artifact uploaded, not yet submitted for analysis.
    Uploaded,
    /// Waiting for a worker to claim it.
    Queued,
    /// Claimed by exactly one worker.
    Processing,
    /// Analysis finished successfully.
    Completed,
    /// Analysis failed; `error_message` holds the reason.
    Failed,
    /// Cancellation requested, waiting for the engine (or the stale run
    /// monitor) to resolve it.
    CancelRequested,
    /// Cancellation resolved.
    Cancelled,
}

impl RunStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RunStatus; 7] = [
        RunStatus::Uploaded,
        RunStatus::Queued,
        RunStatus::Processing,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::CancelRequested,
        RunStatus::Cancelled,
    ];

    /// Column value for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::CancelRequested => "cancel_requested",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the run has reached a state only a retry can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a worker currently owns (or may still own) the run.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing | Self::CancelRequested)
    }

    /// Statuses from which a retry re-queues the run.
    pub fn retryable() -> &'static [RunStatus] {
        &[Self::Completed, Self::Failed, Self::Cancelled]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<String> for RunStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A run row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Run {
    /// Opaque unique identifier, immutable.
    pub id: String,
    /// User that uploaded the recording.
    pub owner_id: String,
    /// Current lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    /// 0-100, non-decreasing while processing.
    pub progress_percentage: i32,
    /// Current step, written by the engine.
    pub progress_message: Option<String>,
    /// Set on transition into `failed`, cleared on every re-queue.
    pub error_message: Option<String>,
    /// Cancellation intent, observable mid-processing.
    pub cancel_requested: bool,
    /// Blob path of the uploaded recording.
    pub video_path: Option<String>,
    /// Size of the uploaded recording in bytes.
    pub video_size_bytes: Option<i64>,
    /// MIME type of the uploaded recording.
    pub video_content_type: Option<String>,
    /// Number of successful claims; fences writes from superseded attempts.
    pub attempt: i32,
    /// Value of `attempt` when the run last entered `queued` from outside
    /// the worker (enqueue or retry); the stale run limit counts from here.
    pub attempt_base: i32,
    /// Worker that holds the current claim.
    pub claimed_by: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// When the run last entered `queued`.
    pub queued_at: Option<DateTime<Utc>>,
    /// When the current claim was won.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Last liveness signal from the owning worker.
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for creating a run after an upload.
#[derive(Debug, Clone)]
pub struct NewRun {
    /// Run id; generated when `None`.
    pub id: Option<String>,
    /// Owning user.
    pub owner_id: String,
    /// Blob path of the uploaded recording.
    pub video_path: Option<String>,
    /// Size in bytes.
    pub video_size_bytes: Option<i64>,
    /// MIME type.
    pub video_content_type: Option<String>,
}

/// A claim won by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedRun {
    /// Claimed run.
    pub run_id: String,
    /// Worker that won.
    pub worker_id: String,
    /// Attempt number assigned by this claim.
    pub attempt: i32,
}

/// Analysis of a single extracted frame.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FrameRecord {
    /// Owning run.
    pub run_id: String,
    /// Position of the frame in the extraction order.
    pub frame_index: i32,
    /// Offset into the recording.
    pub timestamp_ms: i64,
    /// Rubric results for this frame.
    pub analysis: sqlx::types::Json<Value>,
    /// When the frame result was stored.
    pub created_at: DateTime<Utc>,
}

/// Kind of stored summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// Authoritative result shown in the report.
    Primary,
    /// Secondary result kept for comparison only.
    Shadow,
}

impl SummaryKind {
    /// Column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Shadow => "shadow",
        }
    }
}

/// Stored run summary.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SummaryRecord {
    /// Owning run.
    pub run_id: String,
    /// `primary` or `shadow`.
    pub kind: String,
    /// Summary body.
    pub body: sqlx::types::Json<Value>,
    /// When the summary was stored.
    pub created_at: DateTime<Utc>,
}

/// Result written when an attempt finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Engine finished; summaries are stored with the transition.
    Completed {
        /// Primary summary.
        summary: Value,
        /// Optional shadow summary.
        shadow_summary: Option<Value>,
    },
    /// Engine (or the dispatch boundary) failed.
    Failed {
        /// Message shown to the user.
        error: String,
    },
    /// Cancellation was observed.
    Cancelled,
}

impl RunOutcome {
    /// Status this outcome writes when no cancellation is pending.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed { .. } => RunStatus::Completed,
            Self::Failed { .. } => RunStatus::Failed,
            Self::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Counts returned by a stale run sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleSweep {
    /// Runs put back in `queued`.
    pub requeued: u64,
    /// Runs failed after exhausting their attempts.
    pub failed: u64,
    /// Claimed runs with a pending cancel that were resolved.
    pub cancelled: u64,
}

impl StaleSweep {
    /// Total rows touched.
    pub fn total(&self) -> u64 {
        self.requeued + self.failed + self.cancelled
    }
}
