//! HMAC signature generation and verification.
//!
//! The signed message is `{unix_timestamp}.{raw_body}`; the result is sent
//! hex encoded as `X-Webhook-Signature: sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the unix timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
/// Header carrying the delivery id.
pub const ID_HEADER: &str = "X-Webhook-Id";
/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Webhook-Event";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex HMAC-SHA256 of `{timestamp}.{body}` keyed by `secret`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Value of the signature header: `sha256=<hex>`.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", sign(secret, timestamp, body))
}

/// Checks `signature` (with or without the `sha256=` prefix) against the
/// body, rejecting timestamps more than `tolerance_secs` away from `now`.
pub fn verify(
    signature: &str,
    secret: &str,
    timestamp: i64,
    body: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> bool {
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return false;
    }

    let signature = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let expected = sign(secret, timestamp, body);
    constant_time_compare(&expected, signature)
}

/// Signature verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Invalid header format.
    #[error("Invalid signature format")]
    InvalidFormat,
    /// Signature is invalid.
    #[error("Invalid signature")]
    Invalid,
    /// Timestamp outside the tolerance.
    #[error("Signature expired")]
    Expired,
}

/// Verifies the raw header values of a received webhook.
///
/// For receivers: distinguishes a stale timestamp from a bad signature.
pub fn verify_headers(
    signature_header: &str,
    timestamp_header: &str,
    secret: &str,
    body: &[u8],
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let signature = signature_header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::InvalidFormat)?;

    let timestamp = timestamp_header
        .trim()
        .parse::<i64>()
        .map_err(|_| SignatureError::InvalidFormat)?;

    let now = chrono::Utc::now().timestamp();
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    if !verify(signature, secret, timestamp, body, tolerance_secs, now) {
        return Err(SignatureError::Invalid);
    }

    Ok(())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
