// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle operations.
//!
//! User-facing transitions (enqueue, retry, cancel) and reads. Every call
//! is scoped to an owner; a run owned by someone else reads as not found.
//!
//! | Operation | From | To |
//! |-----------|------|----|
//! | `enqueue` | `uploaded` | `queued` |
//! | `retry` | `completed`, `failed`, `cancelled` | `queued` |
//! | `cancel` | `queued`, `processing` | `cancel_requested` |
//!
//! Repeating `enqueue` on a `queued`/`processing` run, or `cancel` on a
//! `cancel_requested`/`cancelled` run, succeeds without touching the row.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::models::{FrameRecord, NewRun, Run, RunStatus, SummaryRecord};
use crate::persistence::RunStore;

/// Failure to deliver a dispatch notification.
#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Tells the dispatch layer that a run was queued.
///
/// Delivery is best-effort: the poller picks the run up anyway.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    /// Notify that `run_id` is queued.
    async fn notify(&self, run_id: &str) -> std::result::Result<(), NotifyError>;
}

/// Notifier that does nothing; runs are left to the poller.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl RunNotifier for NoopNotifier {
    async fn notify(&self, _run_id: &str) -> std::result::Result<(), NotifyError> {
        Ok(())
    }
}

/// Bounds checked on the uploaded artifact before a run may be queued.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Largest accepted recording, in bytes.
    pub max_bytes: i64,
    /// Accepted MIME types (compared case-insensitively, without parameters).
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 500 * 1024 * 1024,
            allowed_content_types: vec![
                "video/mp4".to_string(),
                "video/webm".to_string(),
                "video/quicktime".to_string(),
            ],
        }
    }
}

impl UploadPolicy {
    /// Check that `run` carries an acceptable uploaded recording.
    pub fn validate(&self, run: &Run) -> Result<()> {
        let has_path = run
            .video_path
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if !has_path {
            return Err(CoreError::validation(
                "video_path",
                "run has no uploaded recording",
            ));
        }

        match run.video_size_bytes {
            Some(size) if size > 0 && size <= self.max_bytes => {}
            Some(0) | None => {
                return Err(CoreError::validation("video_size_bytes", "recording is empty"));
            }
            Some(size) if size < 0 => {
                return Err(CoreError::validation(
                    "video_size_bytes",
                    format!("invalid size {}", size),
                ));
            }
            Some(size) => {
                return Err(CoreError::validation(
                    "video_size_bytes",
                    format!("recording is {} bytes, limit is {}", size, self.max_bytes),
                ));
            }
        }

        let content_type = run
            .video_content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !self
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&content_type))
        {
            return Err(CoreError::validation(
                "video_content_type",
                format!("unsupported content type '{}'", content_type),
            ));
        }

        Ok(())
    }
}

/// Result of a lifecycle mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    /// Row after the call.
    pub run: Run,
    /// False when the call was an idempotent no-op.
    pub changed: bool,
}

/// Run with its derived artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The run.
    pub run: Run,
    /// Frame results in frame order.
    pub frames: Vec<FrameRecord>,
    /// Summaries, primary first.
    pub summaries: Vec<SummaryRecord>,
}

/// Lifecycle service over a [`RunStore`].
#[derive(Clone)]
pub struct RunLifecycle {
    store: Arc<dyn RunStore>,
    notifier: Arc<dyn RunNotifier>,
    policy: UploadPolicy,
}

impl RunLifecycle {
    /// Create a lifecycle service with no push notification.
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(NoopNotifier),
            policy: UploadPolicy::default(),
        }
    }

    /// Use `notifier` after enqueue and retry.
    pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Use `policy` to validate artifacts on enqueue.
    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Record a new upload. The run starts in `uploaded`.
    pub async fn create_run(&self, new_run: NewRun) -> Result<Run> {
        if new_run.owner_id.trim().is_empty() {
            return Err(CoreError::validation("owner_id", "must not be empty"));
        }
        let run = self.store.create_run(&new_run).await?;
        info!(run_id = %run.id, owner_id = %run.owner_id, "Run created");
        Ok(run)
    }

    /// Submit an uploaded run for analysis.
    pub async fn enqueue(&self, owner_id: &str, run_id: &str) -> Result<Transition> {
        let run = self.owned_run(owner_id, run_id).await?;

        match run.status {
            RunStatus::Queued | RunStatus::Processing => {
                return Ok(Transition {
                    run,
                    changed: false,
                });
            }
            RunStatus::Uploaded => {}
            status => {
                return Err(CoreError::InvalidTransition {
                    run_id: run_id.to_string(),
                    action: "enqueue",
                    status,
                });
            }
        }

        self.policy.validate(&run)?;

        if !self
            .store
            .mark_queued(run_id, &[RunStatus::Uploaded])
            .await?
        {
            // Lost to a concurrent call; report whatever it produced.
            let run = self.owned_run(owner_id, run_id).await?;
            return match run.status {
                RunStatus::Queued | RunStatus::Processing => Ok(Transition {
                    run,
                    changed: false,
                }),
                status => Err(CoreError::InvalidTransition {
                    run_id: run_id.to_string(),
                    action: "enqueue",
                    status,
                }),
            };
        }

        info!(run_id = %run_id, "Run queued");
        self.notify(run_id).await;
        self.changed(owner_id, run_id).await
    }

    /// Re-queue a finished run, discarding its frames and summaries.
    pub async fn retry(&self, owner_id: &str, run_id: &str) -> Result<Transition> {
        let run = self.owned_run(owner_id, run_id).await?;

        if !RunStatus::retryable().contains(&run.status) {
            return Err(CoreError::InvalidTransition {
                run_id: run_id.to_string(),
                action: "retry",
                status: run.status,
            });
        }

        if !self
            .store
            .reset_for_retry(run_id, RunStatus::retryable())
            .await?
        {
            let run = self.owned_run(owner_id, run_id).await?;
            return Err(CoreError::InvalidTransition {
                run_id: run_id.to_string(),
                action: "retry",
                status: run.status,
            });
        }

        info!(run_id = %run_id, previous = %run.status, "Run re-queued for retry");
        self.notify(run_id).await;
        self.changed(owner_id, run_id).await
    }

    /// Request cancellation.
    ///
    /// A processing run keeps running until the engine observes the flag.
    pub async fn cancel(&self, owner_id: &str, run_id: &str) -> Result<Transition> {
        let run = self.owned_run(owner_id, run_id).await?;

        match run.status {
            RunStatus::CancelRequested | RunStatus::Cancelled => {
                return Ok(Transition {
                    run,
                    changed: false,
                });
            }
            RunStatus::Queued | RunStatus::Processing => {}
            status => {
                return Err(CoreError::InvalidTransition {
                    run_id: run_id.to_string(),
                    action: "cancel",
                    status,
                });
            }
        }

        if !self.store.request_cancel(run_id).await? {
            let run = self.owned_run(owner_id, run_id).await?;
            return match run.status {
                RunStatus::CancelRequested | RunStatus::Cancelled => Ok(Transition {
                    run,
                    changed: false,
                }),
                status => Err(CoreError::InvalidTransition {
                    run_id: run_id.to_string(),
                    action: "cancel",
                    status,
                }),
            };
        }

        info!(run_id = %run_id, previous = %run.status, "Cancellation requested");
        self.changed(owner_id, run_id).await
    }

    /// Current state of a run.
    pub async fn status(&self, owner_id: &str, run_id: &str) -> Result<Run> {
        self.owned_run(owner_id, run_id).await
    }

    /// Run with frames and summaries.
    pub async fn report(&self, owner_id: &str, run_id: &str) -> Result<RunReport> {
        let run = self.owned_run(owner_id, run_id).await?;
        let frames = self.store.list_frames(run_id).await?;
        let summaries = self.store.list_summaries(run_id).await?;
        Ok(RunReport {
            run,
            frames,
            summaries,
        })
    }

    async fn owned_run(&self, owner_id: &str, run_id: &str) -> Result<Run> {
        match self.store.get_run(run_id).await? {
            Some(run) if run.owner_id == owner_id => Ok(run),
            _ => Err(CoreError::RunNotFound {
                run_id: run_id.to_string(),
            }),
        }
    }

    async fn changed(&self, owner_id: &str, run_id: &str) -> Result<Transition> {
        let run = self.owned_run(owner_id, run_id).await?;
        Ok(Transition { run, changed: true })
    }

    async fn notify(&self, run_id: &str) {
        if let Err(e) = self.notifier.notify(run_id).await {
            warn!(run_id = %run_id, error = %e, "Dispatch notification failed; poller will pick the run up");
        }
    }
}
