//! Unverified JWT claim inspection
//!
//! The backend's access tokens are JWTs; the client peeks at claims for
//! display and expiry hints only and never validates signatures.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct Claims {
    exp: Option<i64>,
    email: Option<String>,
}

fn decode_claims(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return None,
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry claim of the token, if present and well-formed
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_claims(token)?.exp?;
    DateTime::from_timestamp(exp, 0)
}

/// Email claim of the token, if present
pub fn email(token: &str) -> Option<String> {
    decode_claims(token)?.email
}

/// Whether the token is past its expiry claim. Tokens without a readable
/// expiry are treated as expired.
pub fn is_expired(token: &str) -> bool {
    match expiry(token) {
        Some(exp) => Utc::now() > exp,
        None => true,
    }
}
