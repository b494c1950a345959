// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fallback poller.
//!
//! Picks up queued runs the push path missed (notification lost, no push
//! endpoint configured, worker restarted). One tick at a time: a tick that
//! fires while the previous one is still running is skipped, not queued.
//!
//! A claimed run is executed inline, so a long analysis holds back the
//! next tick. That bounds the poll path to one run per worker process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reelcheck_core::{ClaimCoordinator, CoreError};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::executor::RunExecutor;

/// Configuration for the poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between ticks.
    pub poll_interval: Duration,
    /// Claim owner id.
    pub worker_id: String,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    /// Nothing queued, or the claim was lost to another path.
    Idle,
    /// A run was claimed and executed.
    Processed(String),
}

/// Clears the busy flag however the tick ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background loop that claims and executes the oldest queued run.
pub struct Poller {
    coordinator: ClaimCoordinator,
    executor: RunExecutor,
    config: PollerConfig,
    busy: AtomicBool,
    shutdown: Arc<Notify>,
}

impl Poller {
    /// Create a poller.
    pub fn new(coordinator: ClaimCoordinator, executor: RunExecutor, config: PollerConfig) -> Self {
        Self {
            coordinator,
            executor,
            config,
            busy: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Whether a tick is in progress.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one tick.
    ///
    /// Store errors are returned after the busy flag is cleared; the run
    /// loop logs them and keeps going.
    pub async fn tick(&self) -> Result<TickOutcome, CoreError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous poll tick still running; skipping");
            return Ok(TickOutcome::Skipped);
        }
        let _busy = BusyGuard(&self.busy);

        let Some(claim) = self
            .coordinator
            .claim_next_queued(&self.config.worker_id)
            .await?
        else {
            return Ok(TickOutcome::Idle);
        };

        let run_id = claim.run_id.clone();
        debug!(run_id = %run_id, "Poller claimed run");
        self.executor.execute(claim).await;

        Ok(TickOutcome::Processed(run_id))
    }

    /// Tick until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            worker_id = %self.config.worker_id,
            "Poller started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Poller received shutdown signal");
                    break;
                }

                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(TickOutcome::Processed(run_id)) => {
                            debug!(run_id = %run_id, "Poll tick processed run");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Poll tick failed");
                        }
                    }
                }
            }
        }

        info!("Poller stopped");
    }
}
