// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server for the push path.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | liveness, reports the worker id |
//! | `POST /process` | authenticated push trigger for one run |
//! | `/runs/...` | lifecycle routes, mounted only when enabled |

pub mod dispatch;
pub mod error;
pub mod runs;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use reelcheck_core::{ClaimCoordinator, RunLifecycle};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::executor::RunExecutor;
use crate::webhook::WebhookAuthenticator;

pub use error::{AppError, AppResult};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Claim owner id and health check identity.
    pub worker_id: Arc<str>,
    /// Push request authentication.
    pub authenticator: Arc<WebhookAuthenticator>,
    /// Claim primitive shared with the poller.
    pub coordinator: ClaimCoordinator,
    /// Executes won claims in the background.
    pub executor: RunExecutor,
}

/// Build the router. Lifecycle routes are added when `lifecycle` is set.
pub fn router(state: AppState, lifecycle: Option<RunLifecycle>) -> Router {
    let mut app = Router::new()
        .route("/health", get(dispatch::health))
        .route("/process", post(dispatch::process))
        .with_state(state);

    if let Some(lifecycle) = lifecycle {
        app = app.merge(runs::router(lifecycle));
    }

    app.layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("HTTP server received shutdown signal");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
