// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Push notifier.
//!
//! Posts `{"run_id": ...}` to a worker's `/process` endpoint after a run is
//! queued, signed the same way the endpoint verifies. Delivery is best
//! effort; a lost push is picked up by the poller.

use std::time::Duration;

use async_trait::async_trait;
use reelcheck_core::{NotifyError, RunNotifier};
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::webhook::{
    NONCE_HEADER, SECRET_HEADER, SIGNATURE_HEADER, SignedHeaders, TIMESTAMP_HEADER,
};

/// Request timeout for one push.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Signed HTTP push to a `/process` endpoint.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    process_url: String,
    secret: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `process_url`.
    pub fn new(
        process_url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            process_url: process_url.into(),
            secret: secret.into(),
        })
    }

    /// Target URL.
    pub fn process_url(&self) -> &str {
        &self.process_url
    }
}

#[async_trait]
impl RunNotifier for WebhookNotifier {
    async fn notify(&self, run_id: &str) -> std::result::Result<(), NotifyError> {
        let body = serde_json::to_vec(&json!({ "run_id": run_id }))
            .map_err(|e| NotifyError(format!("encode body: {}", e)))?;
        let signed = SignedHeaders::new(&self.secret, chrono::Utc::now().timestamp(), &body)
            .map_err(|e| NotifyError(e.to_string()))?;

        let response = self
            .client
            .post(&self.process_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SECRET_HEADER, &self.secret)
            .header(TIMESTAMP_HEADER, &signed.timestamp)
            .header(NONCE_HEADER, &signed.nonce)
            .header(SIGNATURE_HEADER, &signed.signature)
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError(format!("push to {} failed: {}", self.process_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError(format!(
                "push to {} returned {}",
                self.process_url, status
            )));
        }

        debug!(run_id = %run_id, status = status.as_u16(), "Push delivered");
        Ok(())
    }
}
