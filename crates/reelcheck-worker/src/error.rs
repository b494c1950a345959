// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for reelcheck-worker.

use thiserror::Error;

/// Worker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Run store operation failed.
    #[error("Core error: {0}")]
    Core(#[from] reelcheck_core::CoreError),

    /// HTTP client could not be built or a request failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using worker Error.
pub type Result<T> = std::result::Result<T, Error>;
