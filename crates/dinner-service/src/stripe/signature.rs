//! `Stripe-Signature` header verification.
//!
//! Header format: `t=<unix>,v1=<hex>[,v1=<hex>...]`. Each `v1` value is
//! HMAC-SHA256 over `"{t}.{payload}"` keyed with the endpoint secret.

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Why a webhook signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No `t=` element, or one that isn't a Unix timestamp.
    #[error("missing or malformed timestamp")]
    MissingTimestamp,

    /// No `v1=` element.
    #[error("no v1 signature present")]
    MissingSignature,

    /// No `v1` signature matched the payload.
    #[error("signature mismatch")]
    Mismatch,

    /// The timestamp is outside the tolerance window.
    #[error("timestamp outside tolerance ({age_seconds}s)")]
    Expired {
        /// Distance between the signed timestamp and now.
        age_seconds: i64,
    },

    /// The secret could not be used as an HMAC key.
    #[error("unusable signing secret")]
    InvalidSecret,
}

/// Verify a `Stripe-Signature` header for `payload`.
///
/// `now` is the current Unix time; signatures more than `tolerance_seconds`
/// away from it are rejected.
///
/// # Errors
///
/// Returns the reason the signature is not acceptable.
pub fn verify(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MissingTimestamp)?;

    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .map_err(|_| SignatureError::InvalidSecret)?;

    if !signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        return Err(SignatureError::Mismatch);
    }

    let age_seconds = now.saturating_sub(signed_at);
    if age_seconds.unsigned_abs() > tolerance_seconds {
        return Err(SignatureError::Expired { age_seconds });
    }

    Ok(())
}

/// Build a `Stripe-Signature` header value for `payload` signed at `timestamp`.
///
/// # Errors
///
/// Returns an error if the secret cannot be used as an HMAC key.
pub fn sign(payload: &str, secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .map_err(|_| SignatureError::InvalidSecret)?;
    Ok(format!("t={timestamp},v1={signature}"))
}
