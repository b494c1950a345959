// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reelcheck Core - Run Dispatch and Lifecycle
//!
//! This crate owns the run state machine for screen-recording analysis. It
//! decides which worker owns a run, persists every transition with a single
//! conditional statement, and exposes the user-facing lifecycle operations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │        Lifecycle API         │        │      reelcheck-worker        │
//! │  enqueue / retry / cancel    │─notify─►  push endpoint + poller      │
//! └──────────────┬───────────────┘        └──────────────┬───────────────┘
//!                │ RunLifecycle                          │ ClaimCoordinator
//!                ▼                                       ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          RunStore (trait)                            │
//! │          SqliteRunStore             PostgresRunStore                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Run Status State Machine
//!
//! ```text
//!                ┌──────────┐
//!                │ UPLOADED │
//!                └────┬─────┘
//!                     │ enqueue
//!                     ▼
//!                ┌──────────┐   cancel    ┌──────────────────┐
//!        ┌──────►│  QUEUED  │────────────►│ CANCEL_REQUESTED │
//!        │       └────┬─────┘             └────────┬─────────┘
//!        │            │ claim                      │ observed / stale
//!        │            ▼                            ▼
//!        │       ┌────────────┐  cancel     ┌───────────┐
//!        │       │ PROCESSING │────────────►│ CANCELLED │
//!        │       └─────┬──────┘  (flag)     └─────┬─────┘
//!        │             │                          │
//!        │     ┌───────┴───────┐                  │
//!        │     ▼               ▼                  │
//!        │ ┌───────────┐  ┌────────┐              │
//!        │ │ COMPLETED │  │ FAILED │              │
//!        │ └─────┬─────┘  └───┬────┘              │
//!        │       │            │                   │
//!        └───────┴────retry───┴───────────────────┘
//! ```
//!
//! A stale `processing` run (no heartbeat within the configured timeout)
//! goes back to `queued` until it runs out of attempts, then to `failed`.
//!
//! # Fencing
//!
//! Every successful claim increments `attempt`. Progress, frame and finish
//! writes carry the attempt they belong to and are ignored once the run
//! has moved on, so a worker that lost its claim cannot overwrite the
//! next attempt's results.
//!
//! # Modules
//!
//! - [`claim`]: exclusive claim primitive
//! - [`lifecycle`]: enqueue, retry, cancel, reads
//! - [`persistence`]: `RunStore` trait and backends
//! - [`models`]: run, frame and summary types
//! - [`migrations`]: embedded schema
//! - [`error`]: `CoreError`

#![deny(missing_docs)]

pub mod claim;
pub mod error;
pub mod lifecycle;
pub mod migrations;
pub mod models;
pub mod persistence;

pub use claim::ClaimCoordinator;
pub use error::{CoreError, Result};
pub use lifecycle::{
    NoopNotifier, NotifyError, RunLifecycle, RunNotifier, RunReport, Transition, UploadPolicy,
};
pub use models::{
    ClaimedRun, FrameRecord, NewRun, Run, RunOutcome, RunStatus, StaleSweep, SummaryKind,
    SummaryRecord,
};
pub use persistence::{PostgresRunStore, RunStore, SqliteRunStore};
