// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Claim Coordinator.
//!
//! The only writer allowed to move a run into `processing`. Both dispatch
//! paths (push and poll) and every worker process go through the same
//! conditional update in the store, so at most one caller wins a given
//! `queued -> processing` transition.
//!
//! Losing a claim is the expected outcome when another path got there
//! first. It is reported as `false`/`None`, never as an error, and callers
//! must not retry the same run in a loop.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::ClaimedRun;
use crate::persistence::RunStore;

/// Exclusive-claim primitive over a [`RunStore`].
#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Arc<dyn RunStore>,
}

impl ClaimCoordinator {
    /// Create a coordinator over `store`.
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Try to claim `run_id` for `worker_id`.
    ///
    /// Returns `true` iff this call performed the transition.
    pub async fn claim(&self, run_id: &str, worker_id: &str) -> Result<bool> {
        Ok(self.try_claim(run_id, worker_id).await?.is_some())
    }

    /// Like [`claim`](Self::claim), but returns the claim with its attempt
    /// number so later writes can be fenced to it.
    pub async fn try_claim(&self, run_id: &str, worker_id: &str) -> Result<Option<ClaimedRun>> {
        match self.store.claim(run_id, worker_id).await? {
            Some(attempt) => {
                info!(run_id = %run_id, worker_id = %worker_id, attempt, "Run claimed");
                Ok(Some(ClaimedRun {
                    run_id: run_id.to_string(),
                    worker_id: worker_id.to_string(),
                    attempt,
                }))
            }
            None => {
                debug!(
                    run_id = %run_id,
                    worker_id = %worker_id,
                    "Claim lost: run not queued"
                );
                Ok(None)
            }
        }
    }

    /// Claim the oldest queued run, if any.
    ///
    /// A lost race yields `None` for this call; the next poll picks up
    /// whatever is still queued.
    pub async fn claim_next_queued(&self, worker_id: &str) -> Result<Option<ClaimedRun>> {
        let Some(run_id) = self.store.oldest_queued_run_id().await? else {
            return Ok(None);
        };

        self.try_claim(&run_id, worker_id).await
    }
}
