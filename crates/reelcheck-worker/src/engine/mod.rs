// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Analysis engine interface.
//!
//! The engine does the frame extraction and rubric scoring for a claimed
//! run. It never touches run status directly: it reports progress and
//! frames through [`RunContext`] and returns an outcome, and the
//! [`RunExecutor`](crate::executor::RunExecutor) writes the terminal state.
//!
//! Cancellation is cooperative. Engines should call
//! [`RunContext::checkpoint`] between frames and stop when it returns
//! [`AnalysisError::Cancelled`].

pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use reelcheck_core::{CoreError, Run, RunStore};
use serde_json::Value;
use thiserror::Error;

pub use mock::{MockBehavior, MockEngine};

/// Errors from an analysis attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnalysisError {
    /// Cancellation was observed at a checkpoint.
    #[error("Analysis cancelled")]
    Cancelled,

    /// The attempt lost ownership of the run (it was reclaimed).
    #[error("Attempt {attempt} no longer owns run '{run_id}'")]
    Superseded {
        /// Run id.
        run_id: String,
        /// Attempt that was fenced out.
        attempt: i32,
    },

    /// Analysis failed; the message is shown to the user.
    #[error("{0}")]
    Failed(String),

    /// Run store call failed.
    #[error("Run store error: {0}")]
    Store(#[from] CoreError),
}

/// What a finished analysis produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Analysis finished.
    Completed {
        /// Primary summary.
        summary: Value,
        /// Optional comparison summary.
        shadow_summary: Option<Value>,
    },
    /// The engine stopped because cancellation was requested.
    Cancelled,
}

/// Handle the engine uses to talk to the run store for one attempt.
///
/// Every write is fenced to the attempt that was claimed.
#[derive(Clone)]
pub struct RunContext {
    run: Run,
    attempt: i32,
    store: Arc<dyn RunStore>,
}

impl RunContext {
    /// Create a context for `attempt` of `run`.
    pub fn new(run: Run, attempt: i32, store: Arc<dyn RunStore>) -> Self {
        Self {
            run,
            attempt,
            store,
        }
    }

    /// Run id.
    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    /// Attempt number of this claim.
    pub fn attempt(&self) -> i32 {
        self.attempt
    }

    /// Run row as of the claim (artifact location, owner).
    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Record progress. Also serves as the attempt's heartbeat.
    pub async fn report_progress(
        &self,
        percentage: i32,
        message: Option<&str>,
    ) -> Result<(), AnalysisError> {
        if self
            .store
            .update_progress(&self.run.id, self.attempt, percentage, message)
            .await?
        {
            Ok(())
        } else {
            Err(self.superseded())
        }
    }

    /// Current value of the cancel flag.
    pub async fn cancel_requested(&self) -> Result<bool, AnalysisError> {
        Ok(self.store.is_cancel_requested(&self.run.id).await?)
    }

    /// Fail with [`AnalysisError::Cancelled`] if cancellation was requested.
    pub async fn checkpoint(&self) -> Result<(), AnalysisError> {
        if self.cancel_requested().await? {
            return Err(AnalysisError::Cancelled);
        }
        Ok(())
    }

    /// Store the analysis of one frame.
    pub async fn record_frame(
        &self,
        frame_index: i32,
        timestamp_ms: i64,
        analysis: &Value,
    ) -> Result<(), AnalysisError> {
        if self
            .store
            .record_frame(
                &self.run.id,
                self.attempt,
                frame_index,
                timestamp_ms,
                analysis,
            )
            .await?
        {
            Ok(())
        } else {
            Err(self.superseded())
        }
    }

    fn superseded(&self) -> AnalysisError {
        AnalysisError::Superseded {
            run_id: self.run.id.clone(),
            attempt: self.attempt,
        }
    }
}

/// Frame-by-frame analysis of a claimed run.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Engine identifier for logs (e.g. "vision", "mock").
    fn engine_type(&self) -> &'static str;

    /// Analyze the run behind `ctx`.
    ///
    /// Runs to completion; the caller awaits it in a dedicated task, so a
    /// panic here is reported as a failed run.
    async fn analyze(&self, ctx: RunContext) -> Result<AnalysisOutcome, AnalysisError>;
}
