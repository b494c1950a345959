// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook authentication for the push path.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! | Step | Check | Rejection |
//! |------|-------|-----------|
//! | 1 | all four `X-Webhook-*` headers present | 401 |
//! | 2 | shared secret matches (constant time) | 401 |
//! | 3 | timestamp is numeric (fractions truncated) | 400 |
//! | 3 | timestamp within the clock-skew window | 401 |
//! | 4 | nonce not in the cache | 409 |
//! | 5 | HMAC signature matches | 401 |
//! | 6 | nonce recorded | 409 if a concurrent request won |
//!
//! The nonce lookup runs before the signature only to skip the HMAC on
//! obvious replays. The signature check still decides every request that
//! gets that far, and nothing is recorded unless it passes.

pub mod nonce_cache;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};

pub use nonce_cache::{NonceCache, NonceSweeper};
pub use signature::{
    NONCE_HEADER, SECRET_HEADER, SIGNATURE_HEADER, SignedHeaders, TIMESTAMP_HEADER, sign, verify,
};

/// Why a webhook request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookRejection {
    /// A required header is absent or empty.
    #[error("missing webhook header {0}")]
    MissingHeader(&'static str),
    /// Shared secret does not match.
    #[error("invalid webhook secret")]
    SecretMismatch,
    /// Timestamp is not an integer.
    #[error("webhook timestamp is not numeric")]
    MalformedTimestamp,
    /// Timestamp is outside the accepted window.
    #[error("webhook timestamp is {skew_secs}s away from server time")]
    StaleTimestamp {
        /// Signed distance from server time, in seconds.
        skew_secs: i64,
    },
    /// Nonce was already used.
    #[error("replay detected")]
    Replay,
    /// Signature does not match the request.
    #[error("invalid webhook signature")]
    BadSignature,
}

impl WebhookRejection {
    /// HTTP status for this rejection.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedTimestamp => StatusCode::BAD_REQUEST,
            Self::Replay => StatusCode::CONFLICT,
            Self::MissingHeader(_)
            | Self::SecretMismatch
            | Self::StaleTimestamp { .. }
            | Self::BadSignature => StatusCode::UNAUTHORIZED,
        }
    }

    /// Short machine-readable reason, used as a log field.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) => "missing_header",
            Self::SecretMismatch => "secret_mismatch",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::StaleTimestamp { .. } => "stale_timestamp",
            Self::Replay => "replay",
            Self::BadSignature => "bad_signature",
        }
    }
}

/// Webhook header values, borrowed from a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookHeaders<'a> {
    /// `X-Webhook-Secret`
    pub secret: Option<&'a str>,
    /// `X-Webhook-Timestamp`
    pub timestamp: Option<&'a str>,
    /// `X-Webhook-Nonce`
    pub nonce: Option<&'a str>,
    /// `X-Webhook-Signature`
    pub signature: Option<&'a str>,
}

impl<'a> WebhookHeaders<'a> {
    /// Read the webhook headers. Non-UTF-8 values count as absent.
    pub fn from_header_map(headers: &'a HeaderMap) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            secret: get(SECRET_HEADER),
            timestamp: get(TIMESTAMP_HEADER),
            nonce: get(NONCE_HEADER),
            signature: get(SIGNATURE_HEADER),
        }
    }
}

fn require<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, WebhookRejection> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(WebhookRejection::MissingHeader(name))
}

/// Validates push requests against the shared secret and the nonce cache.
pub struct WebhookAuthenticator {
    secret: String,
    clock_skew_secs: i64,
    nonces: Arc<NonceCache>,
}

impl WebhookAuthenticator {
    /// Create an authenticator.
    pub fn new(secret: impl Into<String>, clock_skew: Duration, nonces: Arc<NonceCache>) -> Self {
        Self {
            secret: secret.into(),
            clock_skew_secs: clock_skew.as_secs() as i64,
            nonces,
        }
    }

    /// The nonce cache this authenticator records into.
    pub fn nonces(&self) -> &Arc<NonceCache> {
        &self.nonces
    }

    /// Authenticate a request against the current time.
    pub fn authenticate(
        &self,
        headers: &WebhookHeaders<'_>,
        body: &[u8],
    ) -> Result<(), WebhookRejection> {
        self.authenticate_at(chrono::Utc::now().timestamp(), headers, body)
    }

    /// Authenticate a request as if the current time were `now` (Unix seconds).
    pub fn authenticate_at(
        &self,
        now: i64,
        headers: &WebhookHeaders<'_>,
        body: &[u8],
    ) -> Result<(), WebhookRejection> {
        let secret = require(headers.secret, SECRET_HEADER)?;
        let timestamp = require(headers.timestamp, TIMESTAMP_HEADER)?;
        let nonce = require(headers.nonce, NONCE_HEADER)?;
        let provided_signature = require(headers.signature, SIGNATURE_HEADER)?;

        if !signature::secrets_match(&self.secret, secret) {
            return Err(WebhookRejection::SecretMismatch);
        }

        let signed_at = parse_timestamp(timestamp).ok_or(WebhookRejection::MalformedTimestamp)?;
        let skew_secs = now.saturating_sub(signed_at);
        if skew_secs.unsigned_abs() > self.clock_skew_secs.unsigned_abs() {
            return Err(WebhookRejection::StaleTimestamp { skew_secs });
        }

        if self.nonces.contains(nonce, now) {
            return Err(WebhookRejection::Replay);
        }

        if !signature::verify(&self.secret, timestamp, nonce, body, provided_signature) {
            return Err(WebhookRejection::BadSignature);
        }

        if !self.nonces.insert(nonce, now) {
            return Err(WebhookRejection::Replay);
        }

        Ok(())
    }
}

/// Unix seconds, either integral or with a fractional part that is dropped.
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    let secs = raw.parse::<f64>().ok().filter(|secs| secs.is_finite())?;
    // Saturates outside the i64 range; the skew check rejects those.
    Some(secs.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cret";
    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"run_id":"R2"}"#;

    fn authenticator() -> WebhookAuthenticator {
        WebhookAuthenticator::new(
            SECRET,
            Duration::from_secs(300),
            Arc::new(NonceCache::new(Duration::from_secs(600))),
        )
    }

    struct Request {
        secret: String,
        timestamp: String,
        nonce: String,
        signature: String,
    }

    impl Request {
        fn signed(timestamp: i64, nonce: &str, body: &[u8]) -> Self {
            let timestamp = timestamp.to_string();
            Self {
                secret: SECRET.to_string(),
                signature: sign(SECRET, &timestamp, nonce, body).unwrap(),
                timestamp,
                nonce: nonce.to_string(),
            }
        }

        fn headers(&self) -> WebhookHeaders<'_> {
            WebhookHeaders {
                secret: Some(&self.secret),
                timestamp: Some(&self.timestamp),
                nonce: Some(&self.nonce),
                signature: Some(&self.signature),
            }
        }
    }

    #[test]
    fn test_valid_request_then_replay() {
        let auth = authenticator();
        let req = Request::signed(NOW, "n1", BODY);

        assert_eq!(auth.authenticate_at(NOW, &req.headers(), BODY), Ok(()));
        assert_eq!(
            auth.authenticate_at(NOW + 30, &req.headers(), BODY),
            Err(WebhookRejection::Replay)
        );
    }

    #[test]
    fn test_missing_headers() {
        let auth = authenticator();
        let req = Request::signed(NOW, "n1", BODY);

        let mut headers = req.headers();
        headers.nonce = None;
        let err = auth.authenticate_at(NOW, &headers, BODY).unwrap_err();
        assert_eq!(err, WebhookRejection::MissingHeader(NONCE_HEADER));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let mut headers = req.headers();
        headers.signature = Some("  ");
        assert_eq!(
            auth.authenticate_at(NOW, &headers, BODY),
            Err(WebhookRejection::MissingHeader(SIGNATURE_HEADER))
        );
    }

    #[test]
    fn test_secret_mismatch() {
        let auth = authenticator();
        let mut req = Request::signed(NOW, "n1", BODY);
        req.secret = "guess".to_string();

        let err = auth.authenticate_at(NOW, &req.headers(), BODY).unwrap_err();
        assert_eq!(err, WebhookRejection::SecretMismatch);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_timestamp_checks() {
        let auth = authenticator();

        let mut req = Request::signed(NOW, "n1", BODY);
        req.timestamp = "yesterday".to_string();
        let err = auth.authenticate_at(NOW, &req.headers(), BODY).unwrap_err();
        assert_eq!(err, WebhookRejection::MalformedTimestamp);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let old = Request::signed(NOW - 301, "n2", BODY);
        let err = auth.authenticate_at(NOW, &old.headers(), BODY).unwrap_err();
        assert_eq!(err, WebhookRejection::StaleTimestamp { skew_secs: 301 });
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let future = Request::signed(NOW + 301, "n3", BODY);
        assert!(matches!(
            auth.authenticate_at(NOW, &future.headers(), BODY),
            Err(WebhookRejection::StaleTimestamp { skew_secs: -301 })
        ));

        let edge = Request::signed(NOW - 300, "n4", BODY);
        assert_eq!(auth.authenticate_at(NOW, &edge.headers(), BODY), Ok(()));
    }

    #[test]
    fn test_fractional_timestamp_is_truncated() {
        let auth = authenticator();

        let mut req = Request::signed(NOW, "n1", BODY);
        req.timestamp = format!("{}.75", NOW - 300);
        req.signature = sign(SECRET, &req.timestamp, "n1", BODY).unwrap();
        assert_eq!(auth.authenticate_at(NOW, &req.headers(), BODY), Ok(()));

        let mut late = Request::signed(NOW, "n2", BODY);
        late.timestamp = format!("{}.0", NOW - 301);
        late.signature = sign(SECRET, &late.timestamp, "n2", BODY).unwrap();
        assert_eq!(
            auth.authenticate_at(NOW, &late.headers(), BODY),
            Err(WebhookRejection::StaleTimestamp { skew_secs: 301 })
        );

        for raw in ["NaN", "inf", "-infinity"] {
            let mut req = Request::signed(NOW, "n3", BODY);
            req.timestamp = raw.to_string();
            assert_eq!(
                auth.authenticate_at(NOW, &req.headers(), BODY),
                Err(WebhookRejection::MalformedTimestamp)
            );
        }
    }

    #[test]
    fn test_bad_signature_does_not_burn_nonce() {
        let auth = authenticator();
        let req = Request::signed(NOW, "n1", BODY);

        let tampered = br#"{"run_id":"R9"}"#;
        assert_eq!(
            auth.authenticate_at(NOW, &req.headers(), tampered),
            Err(WebhookRejection::BadSignature)
        );
        assert!(auth.nonces().is_empty());

        assert_eq!(auth.authenticate_at(NOW, &req.headers(), BODY), Ok(()));
    }

    #[test]
    fn test_replay_rejected_until_timestamp_window_closes() {
        let auth = authenticator();
        let req = Request::signed(NOW, "n1", BODY);
        auth.authenticate_at(NOW, &req.headers(), BODY).unwrap();

        // Inside the nonce TTL: replay.
        assert_eq!(
            auth.authenticate_at(NOW + 299, &req.headers(), BODY),
            Err(WebhookRejection::Replay)
        );
        // Past the timestamp window the request is stale regardless of the cache.
        assert!(matches!(
            auth.authenticate_at(NOW + 301, &req.headers(), BODY),
            Err(WebhookRejection::StaleTimestamp { .. })
        ));
        // Even after the nonce expires.
        assert!(matches!(
            auth.authenticate_at(NOW + 601, &req.headers(), BODY),
            Err(WebhookRejection::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn test_same_inputs_same_decision() {
        let auth = authenticator();
        let mut req = Request::signed(NOW, "n1", BODY);
        req.signature = "00".repeat(32);

        for _ in 0..3 {
            assert_eq!(
                auth.authenticate_at(NOW, &req.headers(), BODY),
                Err(WebhookRejection::BadSignature)
            );
        }
    }

    #[test]
    fn test_header_map_parsing() {
        let mut map = HeaderMap::new();
        map.insert("x-webhook-secret", "a".parse().unwrap());
        map.insert("x-webhook-timestamp", "1".parse().unwrap());

        let headers = WebhookHeaders::from_header_map(&map);
        assert_eq!(headers.secret, Some("a"));
        assert_eq!(headers.timestamp, Some("1"));
        assert_eq!(headers.nonce, None);
    }
}
