use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::{claims, liveness};
use crate::clock::Clock;
use crate::storage::models::Session;
use crate::storage::{
    Database, DatabaseError, EntryOp, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY,
};

/// Persisted access/refresh tokens and their expiry.
///
/// The only component that reads or writes the session entries in durable
/// storage; everything else goes through here.
#[derive(Clone)]
pub struct TokenStore {
    clock: Arc<dyn Clock>,
    db: Database,
}

impl TokenStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { clock, db }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Install a session, overwriting whatever was stored before.
    ///
    /// The expiry comes from `lifetime_seconds` when given, else from the
    /// access token's `exp` claim, else stays absent. Absent fields remove
    /// their stored entries. An empty access token clears the store.
    pub fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        lifetime_seconds: Option<u64>,
    ) -> Result<Option<Session>, DatabaseError> {
        if access_token.is_empty() {
            tracing::debug!("Empty access token, clearing session instead");
            self.clear()?;
            return Ok(None);
        }

        let expires_at = self.compute_expires_at(access_token, lifetime_seconds);
        let expires_at_ms = expires_at.map(|at| at.timestamp_millis().to_string());

        let mut ops = vec![EntryOp::Set(ACCESS_TOKEN_KEY, access_token)];
        ops.push(match refresh_token {
            Some(token) => EntryOp::Set(REFRESH_TOKEN_KEY, token),
            None => EntryOp::Remove(REFRESH_TOKEN_KEY),
        });
        ops.push(match expires_at_ms.as_deref() {
            Some(ms) => EntryOp::Set(EXPIRES_AT_KEY, ms),
            None => EntryOp::Remove(EXPIRES_AT_KEY),
        });
        self.db.put_entries(&ops)?;

        tracing::debug!(
            has_refresh_token = refresh_token.is_some(),
            expires_at = ?expires_at,
            "Stored session tokens"
        );

        Ok(Some(Session {
            access_token: access_token.to_string(),
            expires_at,
            refresh_token: refresh_token.map(str::to_string),
        }))
    }

    /// Remove all session entries
    pub fn clear(&self) -> Result<(), DatabaseError> {
        self.db.put_entries(&[
            EntryOp::Remove(ACCESS_TOKEN_KEY),
            EntryOp::Remove(REFRESH_TOKEN_KEY),
            EntryOp::Remove(EXPIRES_AT_KEY),
        ])?;
        tracing::debug!("Cleared session tokens");
        Ok(())
    }

    pub fn get_access_token(&self) -> Result<Option<String>, DatabaseError> {
        self.db.get_entry(ACCESS_TOKEN_KEY)
    }

    pub fn get_refresh_token(&self) -> Result<Option<String>, DatabaseError> {
        self.db.get_entry(REFRESH_TOKEN_KEY)
    }

    /// The stored explicit expiry. An unparseable entry counts as absent.
    pub fn get_expires_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let Some(raw) = self.db.get_entry(EXPIRES_AT_KEY)? else {
            return Ok(None);
        };

        let parsed = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
        if parsed.is_none() {
            tracing::warn!(value = %raw, "Ignoring unparseable token expiry");
        }
        Ok(parsed)
    }

    /// The full session, or `None` when logged out
    pub fn load(&self) -> Result<Option<Session>, DatabaseError> {
        let Some(access_token) = self.get_access_token()? else {
            return Ok(None);
        };

        Ok(Some(Session {
            access_token,
            expires_at: self.get_expires_at()?,
            refresh_token: self.get_refresh_token()?,
        }))
    }

    /// Whether the access token is missing, expired, or expires within `buffer_seconds`
    pub fn is_expired(&self, buffer_seconds: u64) -> Result<bool, DatabaseError> {
        let session = self.load()?;
        Ok(liveness::expires_within(
            session.as_ref(),
            buffer_seconds,
            self.now(),
        ))
    }

    /// Same check as [`is_expired`](Self::is_expired), used with a proactive-refresh buffer
    pub fn is_expiring_soon(&self, buffer_seconds: u64) -> Result<bool, DatabaseError> {
        self.is_expired(buffer_seconds)
    }

    fn compute_expires_at(
        &self,
        access_token: &str,
        lifetime_seconds: Option<u64>,
    ) -> Option<DateTime<Utc>> {
        if let Some(lifetime) = lifetime_seconds {
            let at = i64::try_from(lifetime)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|d| self.now().checked_add_signed(d));
            if at.is_some() {
                return at;
            }
            tracing::warn!(lifetime, "Token lifetime out of range, falling back to exp claim");
        }

        claims::decode(access_token)
            .and_then(|c| c.exp())
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}
