// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-local nonce cache.
//!
//! Remembers accepted webhook nonces until they expire. Expired entries are
//! dropped lazily on lookup and in bulk by [`NonceSweeper`]. Nothing is
//! persisted: after a restart, replay protection falls back to the
//! timestamp window alone.
//!
//! Times are Unix seconds so the cache shares the authenticator's clock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Accepted nonces and their expiry (Unix seconds).
#[derive(Debug)]
pub struct NonceCache {
    entries: DashMap<String, i64>,
    ttl_secs: i64,
}

impl NonceCache {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_secs: ttl.as_secs() as i64,
        }
    }

    /// Whether `nonce` was accepted and has not expired at `now`.
    pub fn contains(&self, nonce: &str, now: i64) -> bool {
        let expired = match self.entries.get(nonce) {
            Some(expiry) if *expiry > now => return true,
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(nonce, |_, expiry| *expiry <= now);
        }
        false
    }

    /// Record `nonce` as used at `now`.
    ///
    /// Returns false if an unexpired entry already exists; a concurrent
    /// request with the same nonce loses here.
    pub fn insert(&self, nonce: &str, now: i64) -> bool {
        let expiry = now + self.ttl_secs;
        match self.entries.entry(nonce.to_string()) {
            Entry::Occupied(mut existing) => {
                if *existing.get() > now {
                    return false;
                }
                existing.insert(expiry);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(expiry);
                true
            }
        }
    }

    /// Drop every entry expired at `now`. Returns how many were removed.
    pub fn sweep(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Background task that sweeps a [`NonceCache`] on a timer.
pub struct NonceSweeper {
    cache: Arc<NonceCache>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl NonceSweeper {
    /// Create a sweeper for `cache`.
    pub fn new(cache: Arc<NonceCache>, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Sweep until shutdown.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Nonce sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Nonce sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    let removed = self.cache.sweep(chrono::Utc::now().timestamp());
                    if removed > 0 {
                        debug!(removed, remaining = self.cache.len(), "Expired nonces swept");
                    }
                }
            }
        }

        info!("Nonce sweeper stopped");
    }
}
