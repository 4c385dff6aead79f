//! auth-session - client-side session cache with single-flight token refresh
//!
//! This crate keeps the access/refresh tokens of a logged-in user and
//! coordinates their renewal:
//! - Durable token storage (redb) with explicit expiry tracking
//! - Unverified claim decoding for expiry estimation
//! - One shared refresh call no matter how many requests hit a 401
//! - Login, registration and logout orchestration
//! - A request layer that attaches bearer tokens and retries once after refresh

pub mod auth;
pub mod clock;
pub mod config;
pub mod guard;
pub mod profile;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use auth::{AuthBackend, HttpAuthBackend, RefreshCoordinator, SessionManager};
use clock::{Clock, SystemClock};
use config::{Config, ConfigError};
use profile::ProfileCache;
use storage::{Database, DatabaseError};
use tokens::TokenStore;
use transport::{ApiClient, AuthHeaderPolicy};

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open session storage: {0}")]
    Database(#[from] DatabaseError),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Process-wide session state.
///
/// Created once with [`SessionContext::init`] and handed to whatever needs
/// it; [`SessionContext::shutdown`] lets an in-flight refresh land first.
#[derive(Debug)]
pub struct SessionContext {
    pub api: ApiClient,
    pub config: Config,
    pub coordinator: Arc<RefreshCoordinator>,
    pub manager: SessionManager,
    pub store: TokenStore,
}

impl SessionContext {
    /// Open storage and talk to the configured backends over HTTP
    pub fn init(config: Config) -> Result<Arc<Self>, InitError> {
        let db = Database::open(&config.storage.data_dir)?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.auth.request_timeout_ms))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        let backend = Arc::new(HttpAuthBackend::new(
            http_client.clone(),
            config.auth_base_url()?,
        ));
        Self::with_backend(config, db, http_client, backend, Arc::new(SystemClock))
    }

    /// Assemble the context from explicit parts
    pub fn with_backend(
        config: Config,
        db: Database,
        http_client: reqwest::Client,
        backend: Arc<dyn AuthBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, InitError> {
        config.validate()?;

        let store = TokenStore::new(db.clone(), clock);
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            Arc::clone(&backend),
        ));
        let manager = SessionManager::new(
            store.clone(),
            backend,
            Arc::clone(&coordinator),
            ProfileCache::new(db),
            config.liveness.clone(),
            Duration::from_millis(config.auth.logout_timeout_ms),
        );
        let api = ApiClient::new(
            http_client,
            config.api_base_url()?,
            AuthHeaderPolicy::new(
                config.api.authorized_prefixes.clone(),
                config.api.excluded_prefixes.clone(),
            ),
            store.clone(),
            Arc::clone(&coordinator),
            config.liveness.refresh_buffer_seconds,
        );

        Ok(Arc::new(Self {
            api,
            config,
            coordinator,
            manager,
            store,
        }))
    }

    /// Wait for any in-flight refresh so its result is persisted before exit
    pub async fn shutdown(&self) {
        if self.coordinator.is_refreshing() {
            tracing::info!("Waiting for in-flight token refresh");
        }
        self.coordinator.settle().await;
    }
}
