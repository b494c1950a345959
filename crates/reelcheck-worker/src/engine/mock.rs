// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Simulates frame analysis against the real run store without decoding
//! any video.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{AnalysisEngine, AnalysisError, AnalysisOutcome, RunContext};

/// What the mock does when asked to analyze a run.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Analyze `frames` frames, `frame_delay` apart, then complete.
    Complete {
        /// Number of frames.
        frames: u32,
        /// Simulated work per frame.
        frame_delay: Duration,
    },
    /// Analyze one frame, then fail with this message.
    Fail(String),
    /// Panic on the first call.
    Panic,
    /// Heartbeat until cancellation is observed.
    UntilCancelled {
        /// Checkpoint interval.
        poll: Duration,
    },
}

/// Mock engine for testing.
pub struct MockEngine {
    behavior: MockBehavior,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Engine that completes three frames quickly.
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Complete {
            frames: 3,
            frame_delay: Duration::from_millis(5),
        })
    }

    /// Engine that fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Fail(message.into()))
    }

    /// Engine that panics.
    pub fn panicking() -> Self {
        Self::with_behavior(MockBehavior::Panic)
    }

    /// Engine that runs until the run is cancelled.
    pub fn until_cancelled() -> Self {
        Self::with_behavior(MockBehavior::UntilCancelled {
            poll: Duration::from_millis(10),
        })
    }

    /// Engine with explicit behavior.
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Run ids analyzed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Most analyses that were ever in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn simulate(&self, ctx: &RunContext) -> Result<AnalysisOutcome, AnalysisError> {
        match &self.behavior {
            MockBehavior::Complete {
                frames,
                frame_delay,
            } => {
                for index in 0..*frames {
                    ctx.checkpoint().await?;
                    tokio::time::sleep(*frame_delay).await;
                    ctx.record_frame(
                        index as i32,
                        index as i64 * 1000,
                        &json!({"frame": index, "passed": true}),
                    )
                    .await?;
                    let pct = ((index + 1) * 100 / (*frames).max(1)) as i32;
                    ctx.report_progress(pct, Some(&format!("Analyzed frame {}", index + 1)))
                        .await?;
                }
                Ok(AnalysisOutcome::Completed {
                    summary: json!({"frames": frames, "score": 1.0}),
                    shadow_summary: Some(json!({"frames": frames, "score": 0.9})),
                })
            }
            MockBehavior::Fail(message) => {
                ctx.record_frame(0, 0, &json!({"frame": 0})).await?;
                Err(AnalysisError::Failed(message.clone()))
            }
            MockBehavior::Panic => panic!("mock engine panic for run {}", ctx.run_id()),
            MockBehavior::UntilCancelled { poll } => loop {
                if ctx.cancel_requested().await? {
                    return Ok(AnalysisOutcome::Cancelled);
                }
                ctx.report_progress(10, Some("Waiting")).await?;
                tokio::time::sleep(*poll).await;
            },
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn analyze(&self, ctx: RunContext) -> Result<AnalysisOutcome, AnalysisError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ctx.run_id().to_string());
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        self.simulate(&ctx).await
    }
}
