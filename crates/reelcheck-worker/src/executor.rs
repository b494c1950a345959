// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run executor.
//!
//! The boundary between dispatch (poller, push endpoint) and the analysis
//! engine. Given a won claim it:
//!
//! 1. loads the run and checks the cancel flag before doing any work
//! 2. runs the engine in its own task, so a panic is contained
//! 3. maps the result to a terminal state and writes it, fenced to the
//!    claimed attempt
//!
//! Engine errors end up in the run's `error_message`; they are never
//! returned to the caller.

use std::sync::Arc;

use reelcheck_core::{ClaimedRun, RunOutcome, RunStatus, RunStore};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::engine::{AnalysisEngine, AnalysisError, AnalysisOutcome, RunContext};

/// Message stored when the engine task panics or is aborted.
pub const ENGINE_CRASH_MESSAGE: &str = "Analysis engine crashed";

/// Runs claimed analyses and records their outcome.
#[derive(Clone)]
pub struct RunExecutor {
    store: Arc<dyn RunStore>,
    engine: Arc<dyn AnalysisEngine>,
    tracker: TaskTracker,
}

impl RunExecutor {
    /// Create an executor.
    pub fn new(store: Arc<dyn RunStore>, engine: Arc<dyn AnalysisEngine>) -> Self {
        Self {
            store,
            engine,
            tracker: TaskTracker::new(),
        }
    }

    /// Execute a claimed run to completion.
    ///
    /// Returns the status written, or `None` if nothing was written (the
    /// run vanished, the attempt was superseded, or the store failed).
    pub async fn execute(&self, claim: ClaimedRun) -> Option<RunStatus> {
        let span = info_span!(
            "execute_run",
            run_id = %claim.run_id,
            attempt = claim.attempt,
            engine = self.engine.engine_type()
        );
        self.execute_inner(claim).instrument(span).await
    }

    async fn execute_inner(&self, claim: ClaimedRun) -> Option<RunStatus> {
        let run = match self.store.get_run(&claim.run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!("Claimed run disappeared before execution");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to load claimed run");
                return None;
            }
        };

        let outcome = if run.cancel_requested {
            info!("Cancellation observed before analysis started");
            RunOutcome::Cancelled
        } else {
            match self.run_engine(RunContext::new(
                run,
                claim.attempt,
                self.store.clone(),
            ))
            .await
            {
                Some(outcome) => outcome,
                None => return None,
            }
        };

        match self
            .store
            .finish_run(&claim.run_id, claim.attempt, &outcome)
            .await
        {
            Ok(Some(status)) => {
                info!(status = %status, "Run finished");
                Some(status)
            }
            Ok(None) => {
                warn!("Attempt was superseded; terminal state not written");
                None
            }
            Err(e) => {
                error!(error = %e, "Failed to write terminal state");
                None
            }
        }
    }

    /// Run the engine in its own task. `None` means the attempt lost
    /// ownership and must not write a terminal state.
    async fn run_engine(&self, ctx: RunContext) -> Option<RunOutcome> {
        let engine = self.engine.clone();
        let task = tokio::spawn(async move { engine.analyze(ctx).await }.in_current_span());

        match task.await {
            Ok(Ok(AnalysisOutcome::Completed {
                summary,
                shadow_summary,
            })) => Some(RunOutcome::Completed {
                summary,
                shadow_summary,
            }),
            Ok(Ok(AnalysisOutcome::Cancelled)) | Ok(Err(AnalysisError::Cancelled)) => {
                info!("Engine stopped on cancellation");
                Some(RunOutcome::Cancelled)
            }
            Ok(Err(AnalysisError::Superseded { .. })) => {
                warn!("Engine stopped: attempt no longer owns the run");
                None
            }
            Ok(Err(e)) => {
                error!(error = %e, "Analysis failed");
                Some(RunOutcome::Failed {
                    error: e.to_string(),
                })
            }
            Err(join_error) => {
                error!(error = %join_error, "Analysis engine task panicked");
                Some(RunOutcome::Failed {
                    error: ENGINE_CRASH_MESSAGE.to_string(),
                })
            }
        }
    }

    /// Execute `claim` in the background.
    ///
    /// The task is tracked so [`drain`](Self::drain) can wait for it.
    pub fn spawn(&self, claim: ClaimedRun) {
        let executor = self.clone();
        debug!(run_id = %claim.run_id, "Submitting detached run");
        self.tracker.spawn(async move {
            executor.execute(claim).await;
        });
    }

    /// Number of detached runs still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every detached run to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
