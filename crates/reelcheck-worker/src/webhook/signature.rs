// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook signing.
//!
//! The signature is `hex(HMAC-SHA256(secret, "{timestamp}.{nonce}." || body))`
//! over the raw request bytes.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";
/// Header carrying the Unix timestamp (seconds) the request was signed at.
/// A fractional part is accepted and truncated; the signature covers the raw value.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
/// Header carrying the single-use nonce.
pub const NONCE_HEADER: &str = "x-webhook-nonce";
/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Signing failed.
#[derive(Debug, thiserror::Error)]
#[error("invalid signing key: {0}")]
pub struct SignatureError(String);

fn keyed(
    secret: &str,
    timestamp: &str,
    nonce: &str,
    body: &[u8],
) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(nonce.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Hex signature for a request.
pub fn sign(
    secret: &str,
    timestamp: &str,
    nonce: &str,
    body: &[u8],
) -> Result<String, SignatureError> {
    let mac = keyed(secret, timestamp, nonce, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `signature` (hex, case-insensitive) against the request.
///
/// The comparison is constant-time.
pub fn verify(secret: &str, timestamp: &str, nonce: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    match keyed(secret, timestamp, nonce, body) {
        Ok(mac) => mac.verify_slice(&provided).is_ok(),
        Err(_) => false,
    }
}

/// Constant-time equality for shared secrets of any length.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Headers for an outbound signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    /// Unix seconds.
    pub timestamp: String,
    /// Fresh nonce.
    pub nonce: String,
    /// Hex signature.
    pub signature: String,
}

impl SignedHeaders {
    /// Sign `body` at `timestamp` with a fresh random nonce.
    pub fn new(secret: &str, timestamp: i64, body: &[u8]) -> Result<Self, SignatureError> {
        let timestamp = timestamp.to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let signature = sign(secret, &timestamp, &nonce, body)?;
        Ok(Self {
            timestamp,
            nonce,
            signature,
        })
    }
}
