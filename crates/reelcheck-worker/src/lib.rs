// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reelcheck Worker - run dispatch
//!
//! Gets queued analysis runs onto a worker exactly once. Two paths race for
//! every run and the run store decides the winner:
//!
//! ```text
//!   lifecycle (enqueue/retry) ──notify──► POST /process ──┐
//!                                                        ├──► claim ──► executor ──► engine
//!   poller (every tick) ─────────────────────────────────┘      │
//!                                                               ▼
//!                                                           run store
//!                                                               ▲
//!   stale run monitor (heartbeat timeout) ──requeue/fail────────┘
//! ```
//!
//! # Push path
//!
//! `POST /process` carries `{"run_id": ...}` and four headers:
//!
//! | Header | Content |
//! |--------|---------|
//! | `X-Webhook-Secret` | shared secret |
//! | `X-Webhook-Timestamp` | Unix seconds |
//! | `X-Webhook-Nonce` | single-use value |
//! | `X-Webhook-Signature` | hex HMAC-SHA256 of `"{timestamp}.{nonce}." + body` |
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 200 | claim won, analysis started |
//! | 202 | run not queued, nothing to do |
//! | 400 | malformed timestamp or body |
//! | 401 | missing header, wrong secret, stale timestamp, bad signature |
//! | 409 | nonce replay |
//!
//! # Poll path
//!
//! [`poller::Poller`] claims the oldest queued run each tick, one tick at a
//! time. It exists for pushes that never arrived.
//!
//! # Modules
//!
//! - [`config`]: environment configuration
//! - [`engine`]: analysis engine trait and mock
//! - [`executor`]: runs a won claim to a terminal state
//! - [`notifier`]: signed push after enqueue
//! - [`poller`]: fallback poll loop
//! - [`runtime`]: wires everything into tokio tasks
//! - [`server`]: HTTP endpoints
//! - [`stale_run_monitor`]: recovers abandoned runs
//! - [`webhook`]: push authentication

#![deny(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod poller;
pub mod runtime;
pub mod server;
pub mod stale_run_monitor;
pub mod webhook;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::{WorkerRuntime, WorkerRuntimeBuilder};
