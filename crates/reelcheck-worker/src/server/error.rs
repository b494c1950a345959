// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reelcheck_core::CoreError;
use serde_json::json;

use crate::webhook::WebhookRejection;

/// Result type for HTTP handlers.
pub type AppResult<T> = Result<T, AppError>;

/// Error rendered as `{"error": {"message", "status"}}`.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status.
    pub status: StatusCode,
    /// Message returned to the caller.
    pub message: String,
}

impl AppError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 409.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<WebhookRejection> for AppError {
    fn from(rejection: WebhookRejection) -> Self {
        Self::new(rejection.status_code(), rejection.to_string())
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RunNotFound { .. } => Self::not_found(err.to_string()),
            CoreError::InvalidTransition { .. } => Self::conflict(err.to_string()),
            CoreError::Conflict { .. } => Self::conflict(err.to_string()),
            CoreError::Validation { .. } => Self::bad_request(err.to_string()),
            _ => {
                tracing::error!(error = %err, "run store operation failed");
                Self::internal("Run store operation failed")
            }
        }
    }
}
