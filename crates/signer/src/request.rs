//! Signed-request scheme.
//!
//! A client signs `timestamp || METHOD || path || hex(sha256(body))` with its
//! ed25519 key and sends the key, timestamp and signature as headers. The
//! server checks the timestamp against a freshness window before verifying.

use crate::error::{SignerError, SignerResult};
use crate::key::{PublicKey, SecretKey};
use cask_core::sha256_hex;

pub const PUBKEY_HEADER: &str = "x-cask-pubkey";
pub const TIMESTAMP_HEADER: &str = "x-cask-timestamp";
pub const SIGNATURE_HEADER: &str = "x-cask-signature";

/// The three headers of a signed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    pub public_key: String,
    pub timestamp: String,
    pub signature: String,
}

/// Bytes covered by the signature.
pub fn signed_payload(timestamp: &str, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let body_hash = sha256_hex(body);
    let method = method.to_ascii_uppercase();
    let mut payload =
        Vec::with_capacity(timestamp.len() + method.len() + path.len() + body_hash.len());
    payload.extend_from_slice(timestamp.as_bytes());
    payload.extend_from_slice(method.as_bytes());
    payload.extend_from_slice(path.as_bytes());
    payload.extend_from_slice(body_hash.as_bytes());
    payload
}

/// Produce the headers for a request at unix time `now`.
pub fn sign_request(
    key: &SecretKey,
    now: i64,
    method: &str,
    path: &str,
    body: &[u8],
) -> SignedHeaders {
    let timestamp = now.to_string();
    let signature = key.sign(&signed_payload(&timestamp, method, path, body));
    SignedHeaders {
        public_key: key.public_key().to_base64(),
        timestamp,
        signature,
    }
}

/// Check freshness and signature. Returns the parsed public key on success.
///
/// Ledger lookup of the key is the caller's job; this only proves possession.
pub fn verify_request(
    headers: &SignedHeaders,
    method: &str,
    path: &str,
    body: &[u8],
    now: i64,
    window_secs: u64,
) -> SignerResult<PublicKey> {
    let timestamp: i64 = headers
        .timestamp
        .trim()
        .parse()
        .map_err(|_| SignerError::InvalidTimestamp(headers.timestamp.clone()))?;
    let skew_secs = timestamp.saturating_sub(now);
    if skew_secs.unsigned_abs() > window_secs {
        return Err(SignerError::StaleTimestamp { skew_secs });
    }

    let public_key = PublicKey::from_base64(&headers.public_key)?;
    public_key.verify(
        &signed_payload(&headers.timestamp, method, path, body),
        &headers.signature,
    )?;
    Ok(public_key)
}
