// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for reelcheck-worker.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use reelcheck_core::UploadPolicy;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// `sqlite:` or `postgres://` URL of the run store
    pub database_url: String,
    /// Shared secret for the push webhook
    pub webhook_secret: String,
    /// Identifier written to `claimed_by`
    pub worker_id: String,
    /// Push endpoint and health check address
    pub http_addr: SocketAddr,
    /// Poller tick
    pub poll_interval: Duration,
    /// How long an accepted nonce is remembered
    pub nonce_ttl: Duration,
    /// Accepted distance between the request timestamp and now
    pub clock_skew: Duration,
    /// Periodic nonce cache sweep
    pub nonce_sweep_interval: Duration,
    /// Heartbeat age after which a processing run is reclaimed (`None` disables)
    pub stale_run_timeout: Option<Duration>,
    /// Stale run monitor cadence
    pub stale_check_interval: Duration,
    /// Age after which a cancel on a never-claimed run is resolved
    pub cancel_grace: Duration,
    /// Claims per run before a stale run is failed
    pub max_attempts: i32,
    /// Push endpoint the notifier posts to
    pub process_url: Option<String>,
    /// Artifact bounds checked on enqueue
    pub upload_policy: UploadPolicy,
    /// Mount the lifecycle routes on the HTTP server
    pub lifecycle_api: bool,
    /// Log output format
    pub log_format: LogFormat,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("worker_id", &self.worker_id)
            .field("http_addr", &self.http_addr)
            .field("poll_interval", &self.poll_interval)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("clock_skew", &self.clock_skew)
            .field("stale_run_timeout", &self.stale_run_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("process_url", &self.process_url)
            .field("lifecycle_api", &self.lifecycle_api)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("REELCHECK_DATABASE_URL")?;
        let webhook_secret = required("REELCHECK_WEBHOOK_SECRET")?;

        let worker_id = std::env::var("REELCHECK_WORKER_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("worker-{}", &id[..8])
            });

        let port: u16 = parse("REELCHECK_HTTP_PORT", 8080)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let poll_interval = Duration::from_millis(parse("REELCHECK_POLL_INTERVAL_MS", 5000)?);
        if poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "REELCHECK_POLL_INTERVAL_MS",
                "0",
                "must be greater than zero",
            ));
        }

        let nonce_ttl = Duration::from_secs(parse("REELCHECK_NONCE_TTL_SECS", 600)?);
        let clock_skew = Duration::from_secs(parse("REELCHECK_CLOCK_SKEW_SECS", 300)?);
        if nonce_ttl <= clock_skew {
            return Err(ConfigError::invalid(
                "REELCHECK_NONCE_TTL_SECS",
                nonce_ttl.as_secs().to_string(),
                "must be longer than REELCHECK_CLOCK_SKEW_SECS",
            ));
        }

        let nonce_sweep_interval =
            Duration::from_secs(parse::<u64>("REELCHECK_NONCE_SWEEP_SECS", 60)?.max(1));

        let stale_run_timeout = match parse::<u64>("REELCHECK_STALE_RUN_TIMEOUT_SECS", 1800)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let stale_check_interval =
            Duration::from_secs(parse::<u64>("REELCHECK_STALE_CHECK_INTERVAL_SECS", 60)?.max(1));
        let cancel_grace = Duration::from_secs(parse("REELCHECK_CANCEL_GRACE_SECS", 300)?);

        let max_attempts: i32 = parse("REELCHECK_MAX_ATTEMPTS", 3)?;
        if max_attempts < 1 {
            return Err(ConfigError::invalid(
                "REELCHECK_MAX_ATTEMPTS",
                max_attempts.to_string(),
                "must be at least 1",
            ));
        }

        let process_url = std::env::var("REELCHECK_PROCESS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let defaults = UploadPolicy::default();
        let max_bytes: i64 = parse("REELCHECK_MAX_UPLOAD_BYTES", defaults.max_bytes)?;
        let allowed_content_types = match std::env::var("REELCHECK_ALLOWED_CONTENT_TYPES") {
            Ok(list) => list
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.allowed_content_types,
        };

        let lifecycle_api = std::env::var("REELCHECK_LIFECYCLE_API")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_format = match std::env::var("REELCHECK_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(ConfigError::invalid(
                    "REELCHECK_LOG_FORMAT",
                    other,
                    "expected 'text' or 'json'",
                ));
            }
        };

        Ok(Self {
            database_url,
            webhook_secret,
            worker_id,
            http_addr,
            poll_interval,
            nonce_ttl,
            clock_skew,
            nonce_sweep_interval,
            stale_run_timeout,
            stale_check_interval,
            cancel_grace,
            max_attempts,
            process_url,
            upload_policy: UploadPolicy {
                max_bytes,
                allowed_content_types,
            },
            lifecycle_api,
            log_format,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, raw, "not a valid number")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    /// A variable is set to an unusable value.
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Value found.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::Invalid {
            var,
            value: value.into(),
            reason,
        }
    }
}
