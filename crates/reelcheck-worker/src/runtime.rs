// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable worker runtime.
//!
//! [`WorkerRuntime`] wires the dispatch pieces together and runs them as
//! tokio tasks:
//!
//! - HTTP server (push endpoint, health, optional lifecycle routes)
//! - fallback poller
//! - stale run monitor (optional)
//! - nonce cache sweeper
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reelcheck_core::SqliteRunStore;
//! use reelcheck_worker::engine::MockEngine;
//! use reelcheck_worker::runtime::WorkerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteRunStore::connect("sqlite:runs.db").await?);
//!
//!     let runtime = WorkerRuntime::builder()
//!         .store(store)
//!         .engine(Arc::new(MockEngine::new()))
//!         .webhook_secret("shared-secret")
//!         .bind_addr("127.0.0.1:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reelcheck_core::{ClaimCoordinator, RunLifecycle, RunStore};
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::AnalysisEngine;
use crate::executor::RunExecutor;
use crate::poller::{Poller, PollerConfig};
use crate::server::{self, AppState};
use crate::stale_run_monitor::{StaleRunMonitor, StaleRunMonitorConfig};
use crate::webhook::{NonceCache, NonceSweeper, WebhookAuthenticator};

/// Builder for creating a [`WorkerRuntime`].
pub struct WorkerRuntimeBuilder {
    store: Option<Arc<dyn RunStore>>,
    engine: Option<Arc<dyn AnalysisEngine>>,
    webhook_secret: Option<String>,
    worker_id: String,
    bind_addr: SocketAddr,
    poll_interval: Duration,
    nonce_ttl: Duration,
    clock_skew: Duration,
    nonce_sweep_interval: Duration,
    stale_monitor: Option<StaleRunMonitorConfig>,
    lifecycle: Option<RunLifecycle>,
}

impl Default for WorkerRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            engine: None,
            webhook_secret: None,
            worker_id: "worker-local".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            poll_interval: Duration::from_secs(5),
            nonce_ttl: Duration::from_secs(600),
            clock_skew: Duration::from_secs(300),
            nonce_sweep_interval: Duration::from_secs(60),
            stale_monitor: Some(StaleRunMonitorConfig::default()),
            lifecycle: None,
        }
    }
}

impl WorkerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run store (required).
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the analysis engine (required).
    pub fn engine(mut self, engine: Arc<dyn AnalysisEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the webhook shared secret (required).
    pub fn webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Set the id written to `claimed_by`.
    ///
    /// Default: `worker-local`
    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the poller tick.
    ///
    /// Default: 5 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how long accepted nonces are remembered.
    ///
    /// Default: 10 minutes
    pub fn nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce_ttl = ttl;
        self
    }

    /// Set the accepted clock skew for webhook timestamps.
    ///
    /// Default: 5 minutes
    pub fn clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Set the nonce cache sweep interval.
    ///
    /// Default: 60 seconds
    pub fn nonce_sweep_interval(mut self, interval: Duration) -> Self {
        self.nonce_sweep_interval = interval;
        self
    }

    /// Configure the stale run monitor; `None` disables it.
    pub fn stale_monitor(mut self, config: Option<StaleRunMonitorConfig>) -> Self {
        self.stale_monitor = config;
        self
    }

    /// Mount the lifecycle routes backed by `lifecycle`.
    pub fn lifecycle(mut self, lifecycle: RunLifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<WorkerRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("engine is required"))?;
        let webhook_secret = self
            .webhook_secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("webhook_secret is required"))?;
        if self.nonce_ttl <= self.clock_skew {
            anyhow::bail!("nonce_ttl must be longer than clock_skew");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than zero");
        }

        Ok(WorkerRuntimeConfig {
            store,
            engine,
            webhook_secret,
            worker_id: self.worker_id,
            bind_addr: self.bind_addr,
            poll_interval: self.poll_interval,
            nonce_ttl: self.nonce_ttl,
            clock_skew: self.clock_skew,
            nonce_sweep_interval: self.nonce_sweep_interval,
            stale_monitor: self.stale_monitor,
            lifecycle: self.lifecycle,
        })
    }
}

/// Configuration for a [`WorkerRuntime`].
pub struct WorkerRuntimeConfig {
    store: Arc<dyn RunStore>,
    engine: Arc<dyn AnalysisEngine>,
    webhook_secret: String,
    worker_id: String,
    bind_addr: SocketAddr,
    poll_interval: Duration,
    nonce_ttl: Duration,
    clock_skew: Duration,
    nonce_sweep_interval: Duration,
    stale_monitor: Option<StaleRunMonitorConfig>,
    lifecycle: Option<RunLifecycle>,
}

impl WorkerRuntimeConfig {
    /// Bind the HTTP listener and spawn every background task.
    pub async fn start(self) -> Result<WorkerRuntime> {
        let coordinator = ClaimCoordinator::new(self.store.clone());
        let executor = RunExecutor::new(self.store.clone(), self.engine.clone());

        let nonces = Arc::new(NonceCache::new(self.nonce_ttl));
        let authenticator = Arc::new(WebhookAuthenticator::new(
            self.webhook_secret,
            self.clock_skew,
            nonces.clone(),
        ));

        let sweeper = NonceSweeper::new(nonces, self.nonce_sweep_interval);
        let sweeper_shutdown = sweeper.shutdown_handle();
        let sweeper_handle = tokio::spawn(async move {
            sweeper.run().await;
        });

        let poller = Poller::new(
            coordinator.clone(),
            executor.clone(),
            PollerConfig {
                poll_interval: self.poll_interval,
                worker_id: self.worker_id.clone(),
            },
        );
        let poller_shutdown = poller.shutdown_handle();
        let poller_handle = tokio::spawn(async move {
            poller.run().await;
        });

        let stale_monitor = self.stale_monitor.map(|config| {
            let monitor = StaleRunMonitor::new(self.store.clone(), config);
            let shutdown = monitor.shutdown_handle();
            let handle = tokio::spawn(async move {
                monitor.run().await;
            });
            (shutdown, handle)
        });

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let state = AppState {
            worker_id: Arc::from(self.worker_id.as_str()),
            authenticator,
            coordinator,
            executor: executor.clone(),
        };
        let lifecycle_api = self.lifecycle.is_some();
        let app = server::router(state, self.lifecycle);

        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(server::serve(listener, app, server_shutdown_rx));

        info!(
            addr = %local_addr,
            worker_id = %self.worker_id,
            stale_monitor = stale_monitor.is_some(),
            lifecycle_api,
            engine = self.engine.engine_type(),
            "WorkerRuntime started"
        );

        Ok(WorkerRuntime {
            server_handle,
            poller_handle,
            sweeper_handle,
            stale_monitor,
            server_shutdown_tx,
            poller_shutdown,
            sweeper_shutdown,
            executor,
            local_addr,
        })
    }
}

/// A running dispatch worker.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct WorkerRuntime {
    server_handle: JoinHandle<Result<()>>,
    poller_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
    stale_monitor: Option<(Arc<Notify>, JoinHandle<()>)>,
    server_shutdown_tx: watch::Sender<bool>,
    poller_shutdown: Arc<Notify>,
    sweeper_shutdown: Arc<Notify>,
    executor: RunExecutor,
    local_addr: SocketAddr,
}

impl WorkerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs started from the push path that have not finished.
    pub fn in_flight(&self) -> usize {
        self.executor.in_flight()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting requests and ticks, then waits for the in-flight
    /// push runs. A poll run in progress finishes before the poller exits.
    pub async fn shutdown(self) -> Result<()> {
        info!("WorkerRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.poller_shutdown.notify_one();
        self.sweeper_shutdown.notify_one();
        if let Some((shutdown, _)) = &self.stale_monitor {
            shutdown.notify_one();
        }

        if let Err(e) = self.poller_handle.await {
            error!("Poller task panicked: {}", e);
        }
        if let Err(e) = self.sweeper_handle.await {
            error!("Nonce sweeper task panicked: {}", e);
        }
        if let Some((_, handle)) = self.stale_monitor
            && let Err(e) = handle.await
        {
            error!("Stale run monitor task panicked: {}", e);
        }

        let server_result = match self.server_handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("server task panicked: {}", e)),
        };

        self.executor.drain().await;

        match server_result {
            Ok(()) => {
                info!("WorkerRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("WorkerRuntime server error during shutdown: {}", e);
                Err(e)
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let monitor_running = self
            .stale_monitor
            .as_ref()
            .is_none_or(|(_, handle)| !handle.is_finished());

        !self.server_handle.is_finished()
            && !self.poller_handle.is_finished()
            && !self.sweeper_handle.is_finished()
            && monitor_running
    }
}
