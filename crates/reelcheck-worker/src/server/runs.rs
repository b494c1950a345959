// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle routes.
//!
//! Every route is scoped to the caller named in `x-owner-id`. A run owned
//! by someone else answers 404, same as a missing one.

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use reelcheck_core::{NewRun, Run, RunLifecycle, RunReport, Transition};
use serde::Deserialize;

use super::{AppError, AppResult};

/// Header naming the calling user.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Caller identity taken from [`OWNER_HEADER`].
#[derive(Debug, Clone)]
pub struct Owner(
    /// Owner id.
    pub String,
);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| AppError::unauthorized(format!("Missing {} header", OWNER_HEADER)))
    }
}

/// Body of `POST /runs`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateRunRequest {
    /// Client-chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Blob path of the uploaded recording.
    #[serde(default)]
    pub video_path: Option<String>,
    /// Upload size in bytes.
    #[serde(default)]
    pub video_size_bytes: Option<i64>,
    /// Upload MIME type.
    #[serde(default)]
    pub video_content_type: Option<String>,
}

/// Lifecycle routes over `lifecycle`.
pub fn router<S>(lifecycle: RunLifecycle) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/runs", post(create_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/report", get(get_report))
        .route("/runs/{id}/enqueue", post(enqueue_run))
        .route("/runs/{id}/retry", post(retry_run))
        .route("/runs/{id}/cancel", post(cancel_run))
        .with_state(lifecycle)
}

async fn create_run(
    State(lifecycle): State<RunLifecycle>,
    Owner(owner_id): Owner,
    Json(body): Json<CreateRunRequest>,
) -> AppResult<(StatusCode, Json<Run>)> {
    let run = lifecycle
        .create_run(NewRun {
            id: body.id,
            owner_id,
            video_path: body.video_path,
            video_size_bytes: body.video_size_bytes,
            video_content_type: body.video_content_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn get_run(
    State(lifecycle): State<RunLifecycle>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> AppResult<Json<Run>> {
    Ok(Json(lifecycle.status(&owner_id, &id).await?))
}

async fn get_report(
    State(lifecycle): State<RunLifecycle>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> AppResult<Json<RunReport>> {
    Ok(Json(lifecycle.report(&owner_id, &id).await?))
}

async fn enqueue_run(
    State(lifecycle): State<RunLifecycle>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> AppResult<Json<Transition>> {
    Ok(Json(lifecycle.enqueue(&owner_id, &id).await?))
}

async fn retry_run(
    State(lifecycle): State<RunLifecycle>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> AppResult<Json<Transition>> {
    Ok(Json(lifecycle.retry(&owner_id, &id).await?))
}

async fn cancel_run(
    State(lifecycle): State<RunLifecycle>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> AppResult<Json<Transition>> {
    Ok(Json(lifecycle.cancel(&owner_id, &id).await?))
}
