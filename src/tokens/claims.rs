//! Unverified decoding of compact signed tokens.
//!
//! Only the payload segment is read. Nothing here checks a signature, so
//! the claims are good for display and expiry estimation, never for trust.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Token has no payload segment")]
    MissingPayload,
    #[error("Payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// Decoded token payload: claim name -> value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The `exp` claim in seconds since the epoch.
    ///
    /// Fractional values are truncated; anything non-numeric counts as absent.
    pub fn exp(&self) -> Option<i64> {
        let exp = self.0.get("exp")?;
        exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
    }

    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }
}

/// Decode the claims of `token`, or `None` if it is malformed.
pub fn decode(token: &str) -> Option<Claims> {
    match try_decode(token) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!(error = %e, "Token claims unavailable");
            None
        }
    }
}

/// Decode the claims of `token`, reporting why it could not be read.
pub fn try_decode(token: &str) -> Result<Claims, DecodeError> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(DecodeError::MissingPayload)?;

    // Some issuers keep the padding; the URL-safe alphabet itself is mandatory.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;

    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(Claims(map)),
        _ => Err(DecodeError::NotAnObject),
    }
}
