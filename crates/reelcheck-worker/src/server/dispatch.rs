// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Push dispatcher handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AppError, AppResult, AppState};
use crate::webhook::WebhookHeaders;

/// Response body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Id of this worker.
    pub worker_id: String,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        worker_id: state.worker_id.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    run_id: Option<String>,
}

/// Response body of `POST /process`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    /// `processing started` or `skipped`.
    pub status: String,
    /// Run named in the request.
    pub run_id: String,
}

/// `POST /process`
///
/// 200 when this worker won the claim and started the analysis, 202 when
/// the run was not queued (another path got it first).
pub async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ProcessResponse>)> {
    if let Err(rejection) = state
        .authenticator
        .authenticate(&WebhookHeaders::from_header_map(&headers), &body)
    {
        warn!(
            target: "reelcheck::security",
            reason = rejection.reason(),
            error = %rejection,
            "Webhook request rejected"
        );
        return Err(rejection.into());
    }

    let request: ProcessRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("Invalid request body: {}", e)))?;
    let run_id = request
        .run_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("run_id is required"))?;

    match state.coordinator.try_claim(&run_id, &state.worker_id).await? {
        Some(claim) => {
            info!(run_id = %run_id, attempt = claim.attempt, "Push claim won; processing started");
            state.executor.spawn(claim);
            Ok((
                StatusCode::OK,
                Json(ProcessResponse {
                    status: "processing started".to_string(),
                    run_id,
                }),
            ))
        }
        None => {
            debug!(run_id = %run_id, "Push skipped: run not queued");
            Ok((
                StatusCode::ACCEPTED,
                Json(ProcessResponse {
                    status: "skipped".to_string(),
                    run_id,
                }),
            ))
        }
    }
}
