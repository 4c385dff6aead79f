use thiserror::Error;

use crate::storage::DatabaseError;

/// Failure talking to the authentication backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Request failed with status {status}")]
    Status { message: Option<String>, status: u16 },
}

impl BackendError {
    /// The backend's human-readable message, if it sent one
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Outcome of a failed refresh, shared by every caller waiting on it
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Refresh ended without a result")]
    Aborted,
    #[error("Session was cleared while refreshing")]
    Invalidated,
    #[error("Refresh response did not contain an access token")]
    InvalidRefreshResponse,
    #[error("Network failure during refresh: {0}")]
    NetworkFailure(String),
    #[error("No refresh token available")]
    NoRefreshToken,
    #[error("Refresh rejected with status {status}")]
    Rejected { message: Option<String>, status: u16 },
    #[error("Failed to persist refreshed session: {0}")]
    Storage(String),
}

impl RefreshError {
    /// Whether retrying later cannot help, so the session should be dropped
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Self::NoRefreshToken | Self::InvalidRefreshResponse => true,
            // Server-side trouble may pass; a refused token will not
            Self::Rejected { status, .. } => matches!(status, 400 | 401 | 403),
            _ => false,
        }
    }
}

impl From<BackendError> for RefreshError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InvalidResponse(_) => Self::InvalidRefreshResponse,
            BackendError::Network(msg) => Self::NetworkFailure(msg),
            BackendError::Status { message, status } => Self::Rejected { message, status },
        }
    }
}

impl From<DatabaseError> for RefreshError {
    fn from(e: DatabaseError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Session lifecycle errors (login, register, logout)
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Login response did not contain an access token")]
    MissingAccessToken,
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error("Session expired")]
    SessionExpired,
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please log in again";

impl AuthError {
    /// Text to show the user: the backend's message when it sent one,
    /// otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Backend(e) => e.message().unwrap_or(fallback).to_string(),
            Self::SessionExpired | Self::Refresh(_) => SESSION_EXPIRED_MESSAGE.to_string(),
            _ => fallback.to_string(),
        }
    }
}
