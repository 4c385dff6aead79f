//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::auth::backend::{AuthBackend, Credentials, RegisterRequest, RegisterResponse, TokenResponse};
use crate::auth::error::BackendError;
use crate::config::{ApiConfig, AuthConfig, Config, LivenessConfig, StorageConfig};
use crate::storage::Database;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard. The caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A `Config` pointing at localhost, with default buffers.
pub fn test_config() -> Config {
    Config {
        api: ApiConfig::default(),
        auth: AuthConfig::default(),
        liveness: LivenessConfig::default(),
        storage: StorageConfig {
            data_dir: "/tmp/test".to_string(),
        },
    }
}

/// Build an unsigned compact token carrying `claims` as its payload.
pub fn make_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// An [`AuthBackend`] that replays queued responses.
///
/// A gated backend holds every refresh call until [`release`](Self::release)
/// is called, which lets tests pile up concurrent callers first.
#[derive(Default)]
pub struct ScriptedBackend {
    gate: Option<Semaphore>,
    last_refresh_token: Mutex<Option<String>>,
    login_responses: Mutex<VecDeque<Result<TokenResponse, BackendError>>>,
    logout_calls: AtomicUsize,
    logout_delay: Option<Duration>,
    logout_error: Option<BackendError>,
    refresh_calls: AtomicUsize,
    refresh_responses: Mutex<VecDeque<Result<TokenResponse, BackendError>>>,
    register_calls: AtomicUsize,
    register_error: Mutex<Option<BackendError>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_logout_error(mut self, error: BackendError) -> Self {
        self.logout_error = Some(error);
        self
    }

    pub fn with_logout_delay(mut self, delay: Duration) -> Self {
        self.logout_delay = Some(delay);
        self
    }

    pub fn push_login(&self, response: Result<TokenResponse, BackendError>) {
        self.login_responses.lock().unwrap().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<TokenResponse, BackendError>) {
        self.refresh_responses.lock().unwrap().push_back(response);
    }

    pub fn fail_register(&self, error: BackendError) {
        *self.register_error.lock().unwrap() = Some(error);
    }

    /// Let one gated refresh call through
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn register(&self, _payload: &RegisterRequest) -> Result<RegisterResponse, BackendError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        match self.register_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(RegisterResponse::default()),
        }
    }

    async fn login(&self, _credentials: &Credentials) -> Result<TokenResponse, BackendError> {
        self.login_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Network("no scripted login".into())))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.refresh_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Network("no scripted refresh".into())))
    }

    async fn logout(&self, _refresh_token: Option<&str>) -> Result<(), BackendError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.logout_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.logout_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
