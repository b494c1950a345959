// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reelcheck Worker - run dispatch server
//!
//! Serves the push endpoint, runs the fallback poller and the stale run
//! monitor against a SQLite or PostgreSQL run store.

use std::sync::Arc;

use reelcheck_core::{PostgresRunStore, RunLifecycle, RunStore, SqliteRunStore};
use reelcheck_worker::config::{Config, LogFormat};
use reelcheck_worker::engine::{AnalysisEngine, MockEngine};
use reelcheck_worker::notifier::{DEFAULT_NOTIFY_TIMEOUT, WebhookNotifier};
use reelcheck_worker::runtime::WorkerRuntime;
use reelcheck_worker::stale_run_monitor::StaleRunMonitorConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present; logging is not up yet, report below
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reelcheck_worker=info,reelcheck_core=info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    info!(
        worker_id = %config.worker_id,
        http_addr = %config.http_addr,
        "Starting Reelcheck Worker"
    );

    let store: Arc<dyn RunStore> = if config.database_url.starts_with("postgres") {
        Arc::new(PostgresRunStore::connect(&config.database_url, 10).await?)
    } else {
        Arc::new(SqliteRunStore::connect(&config.database_url).await?)
    };
    info!("Run store connected and migrated");

    let engine: Arc<dyn AnalysisEngine> = Arc::new(MockEngine::new());
    info!(engine = engine.engine_type(), "Analysis engine initialized");

    let stale_monitor = config.stale_run_timeout.map(|stale_timeout| StaleRunMonitorConfig {
        check_interval: config.stale_check_interval,
        stale_timeout,
        max_attempts: config.max_attempts,
        cancel_grace: config.cancel_grace,
    });

    let mut builder = WorkerRuntime::builder()
        .store(store.clone())
        .engine(engine)
        .webhook_secret(&config.webhook_secret)
        .worker_id(&config.worker_id)
        .bind_addr(config.http_addr)
        .poll_interval(config.poll_interval)
        .nonce_ttl(config.nonce_ttl)
        .clock_skew(config.clock_skew)
        .nonce_sweep_interval(config.nonce_sweep_interval)
        .stale_monitor(stale_monitor);

    if config.lifecycle_api {
        let mut lifecycle =
            RunLifecycle::new(store).with_upload_policy(config.upload_policy.clone());
        if let Some(url) = &config.process_url {
            lifecycle = lifecycle.with_notifier(Arc::new(WebhookNotifier::new(
                url,
                &config.webhook_secret,
                DEFAULT_NOTIFY_TIMEOUT,
            )?));
            info!(process_url = %url, "Push notifications enabled");
        }
        builder = builder.lifecycle(lifecycle);
    }

    let runtime = builder.build()?.start().await?;
    info!(addr = %runtime.local_addr(), "Worker ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Reelcheck Worker shut down");
    Ok(())
}
