// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for recovering stale runs.
//!
//! A run whose worker died mid-analysis stays `processing` forever unless
//! something notices its heartbeat stopped. Each check:
//!
//! - requeues `processing` runs with an old heartbeat, or fails them once
//!   they have used up their attempts
//! - cancels claimed `cancel_requested` runs whose worker went quiet
//! - cancels `cancel_requested` runs that were never claimed, after a grace
//!
//! Requeueing is safe against a worker that was only slow: its later writes
//! carry the old attempt and are fenced out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reelcheck_core::{RunStore, StaleSweep};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Configuration for the stale run monitor.
#[derive(Debug, Clone)]
pub struct StaleRunMonitorConfig {
    /// How often to check.
    pub check_interval: Duration,
    /// Heartbeat age after which a claimed run is considered abandoned.
    pub stale_timeout: Duration,
    /// Claims per run before a stale run is failed instead of requeued.
    pub max_attempts: i32,
    /// Age after which a cancel on a never-claimed run is resolved.
    pub cancel_grace: Duration,
}

impl Default for StaleRunMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            stale_timeout: Duration::from_secs(1800),
            max_attempts: 3,
            cancel_grace: Duration::from_secs(300),
        }
    }
}

/// Counts from one check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleCheck {
    /// Claimed runs reclaimed.
    pub sweep: StaleSweep,
    /// Never-claimed cancellations resolved.
    pub unclaimed_cancelled: u64,
}

impl StaleCheck {
    /// Total rows touched.
    pub fn total(&self) -> u64 {
        self.sweep.total() + self.unclaimed_cancelled
    }
}

/// Background worker that reclaims abandoned runs.
pub struct StaleRunMonitor {
    store: Arc<dyn RunStore>,
    config: StaleRunMonitorConfig,
    shutdown: Arc<Notify>,
}

impl StaleRunMonitor {
    /// Create a new monitor.
    pub fn new(store: Arc<dyn RunStore>, config: StaleRunMonitorConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Check until shutdown.
    pub async fn run(&self) {
        info!(
            check_interval_secs = self.config.check_interval.as_secs(),
            stale_timeout_secs = self.config.stale_timeout.as_secs(),
            max_attempts = self.config.max_attempts,
            "Stale run monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Stale run monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.check_interval) => {
                    if let Err(e) = self.check_once().await {
                        error!(error = %e, "Failed to check stale runs");
                    }
                }
            }
        }

        info!("Stale run monitor stopped");
    }

    /// Run one check against the current time.
    pub async fn check_once(&self) -> Result<StaleCheck> {
        self.check_at(Utc::now()).await
    }

    /// Run one check as if the time were `now`.
    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<StaleCheck> {
        let stale_cutoff = now - to_chrono(self.config.stale_timeout)?;
        let grace_cutoff = now - to_chrono(self.config.cancel_grace)?;

        let sweep = self
            .store
            .reclaim_stale_runs(stale_cutoff, self.config.max_attempts)
            .await?;
        let unclaimed_cancelled = self
            .store
            .resolve_unclaimed_cancellations(grace_cutoff)
            .await?;

        let check = StaleCheck {
            sweep,
            unclaimed_cancelled,
        };
        if check.total() == 0 {
            debug!("No stale runs found");
        } else {
            warn!(
                requeued = sweep.requeued,
                failed = sweep.failed,
                cancelled = sweep.cancelled,
                unclaimed_cancelled,
                "Recovered stale runs"
            );
        }
        Ok(check)
    }
}

fn to_chrono(d: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d).map_err(|e| Error::Other(format!("Invalid duration: {}", e)))
}
