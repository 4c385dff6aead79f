//! Token liveness.
//!
//! "Is this token usable" and "is it expiring soon" are the same question
//! asked with different buffers, so both go through [`expires_within`].

use chrono::{DateTime, Duration, Utc};

use super::claims;
use crate::storage::models::Session;

/// Whether the session's access token is expired, or will be within
/// `buffer_seconds` of `now`.
///
/// - No session: expired.
/// - Explicit expiry stored: compared against `now + buffer`.
/// - Otherwise the token's `exp` claim is used. A token without a readable
///   `exp` is treated as NOT expired, since its liveness cannot be known.
pub fn expires_within(session: Option<&Session>, buffer_seconds: u64, now: DateTime<Utc>) -> bool {
    let Some(session) = session else {
        return true;
    };

    let expires_at = match session.expires_at {
        Some(at) => at,
        None => match claims::decode(&session.access_token)
            .and_then(|c| c.exp())
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
        {
            Some(at) => at,
            None => return false,
        },
    };

    let threshold = i64::try_from(buffer_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|buffer| expires_at.checked_sub_signed(buffer));

    match threshold {
        Some(threshold) => now >= threshold,
        // A buffer that reaches past the representable range covers any expiry
        None => true,
    }
}
