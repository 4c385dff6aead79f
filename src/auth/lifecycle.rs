//! Login, registration and logout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::backend::{AuthBackend, Credentials, RegisterRequest, RegisterResponse};
use super::coordinator::RefreshCoordinator;
use super::error::{AuthError, RefreshError};
use crate::config::LivenessConfig;
use crate::profile::ProfileCache;
use crate::storage::models::{AccountInfo, Session, UserProfile};
use crate::tokens::{claims, TokenStore};

/// What a successful login produced
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account_info: Option<AccountInfo>,
    pub session: Session,
}

/// Session state restored at startup
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub profile: Option<UserProfile>,
}

pub struct SessionManager {
    backend: Arc<dyn AuthBackend>,
    coordinator: Arc<RefreshCoordinator>,
    liveness: LivenessConfig,
    logout_timeout: Duration,
    profiles: ProfileCache,
    store: TokenStore,
}

impl SessionManager {
    pub fn new(
        store: TokenStore,
        backend: Arc<dyn AuthBackend>,
        coordinator: Arc<RefreshCoordinator>,
        profiles: ProfileCache,
        liveness: LivenessConfig,
        logout_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            coordinator,
            liveness,
            logout_timeout,
            profiles,
            store,
        }
    }

    /// Authenticate and install the returned session.
    ///
    /// Nothing is stored unless the backend answered with a usable access
    /// token. Backend errors are passed through untouched; no retries.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, AuthError> {
        let response = self.backend.login(credentials).await?;

        let access_token = response
            .usable_access_token()
            .ok_or(AuthError::MissingAccessToken)?;
        let session = self
            .store
            .set_session(
                access_token,
                response.reissued_refresh_token(),
                response.expires_in,
            )?
            .ok_or(AuthError::MissingAccessToken)?;

        let subject = claims::decode(&session.access_token)
            .and_then(|c| c.subject().map(str::to_string));
        info!(
            subject = subject.as_deref().unwrap_or("unknown"),
            has_refresh_token = session.refresh_token.is_some(),
            "Logged in"
        );
        Ok(LoginOutcome {
            account_info: response.account_info,
            session,
        })
    }

    /// Cache the user-facing profile after a login.
    ///
    /// Best-effort: a failure here leaves the session as it is.
    pub fn remember_profile(
        &self,
        email: &str,
        account_info: Option<&AccountInfo>,
    ) -> Option<UserProfile> {
        let profile = UserProfile::from_login(email, account_info);
        match self.profiles.store(&profile) {
            Ok(()) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Failed to cache user profile");
                None
            }
        }
    }

    /// Log in, then cache the profile
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<LoginOutcome, AuthError> {
        let outcome = self.login(credentials).await?;
        self.remember_profile(&credentials.email, outcome.account_info.as_ref());
        Ok(outcome)
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, payload: &RegisterRequest) -> Result<RegisterResponse, AuthError> {
        let response = self.backend.register(payload).await?;
        info!("Registered account");
        Ok(response)
    }

    /// Create an account and sign straight in with the same credentials
    pub async fn register_and_sign_in(
        &self,
        payload: &RegisterRequest,
    ) -> Result<LoginOutcome, AuthError> {
        self.register(payload).await?;
        self.sign_in(&payload.credentials()).await
    }

    /// End the session.
    ///
    /// The backend is told on a best-effort basis, bounded by the logout
    /// timeout. Local state is cleared whatever happens to that call.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let refresh_token = self.store.get_refresh_token().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read refresh token for logout");
            None
        });

        self.coordinator.invalidate();

        match tokio::time::timeout(
            self.logout_timeout,
            self.backend.logout(refresh_token.as_deref()),
        )
        .await
        {
            Ok(Ok(())) => debug!("Backend acknowledged logout"),
            Ok(Err(e)) => warn!(error = %e, "Logout notification failed"),
            Err(_) => warn!(
                timeout_ms = self.logout_timeout.as_millis() as u64,
                "Logout notification timed out"
            ),
        }

        // A refresh may have started while the notification was pending
        self.coordinator.end_session()?;
        if let Err(e) = self.profiles.clear() {
            warn!(error = %e, "Failed to clear cached profile");
        }
        info!("Logged out");
        Ok(())
    }

    /// Whether a usable access token is stored right now
    pub fn is_authenticated(&self) -> Result<bool, AuthError> {
        Ok(!self.store.is_expired(self.liveness.usable_buffer_seconds)?)
    }

    pub fn current_profile(&self) -> Result<Option<UserProfile>, AuthError> {
        Ok(self.profiles.load()?)
    }

    /// Restore the session at startup.
    ///
    /// Refreshes a token that is about to expire. A refresh the backend
    /// refuses ends the session; a network failure keeps it for later.
    pub async fn initialize(&self) -> Result<SessionStatus, AuthError> {
        match self
            .coordinator
            .refresh_if_expiring_soon(self.liveness.refresh_buffer_seconds)
            .await
        {
            Ok(Some(_)) => debug!("Refreshed session during startup"),
            Ok(None) => {}
            Err(e) if e.is_unrecoverable() => {
                warn!(error = %e, "Stored session can no longer be refreshed, clearing it");
                self.coordinator.end_session()?;
            }
            Err(e @ RefreshError::Storage(_)) => return Err(e.into()),
            Err(e) => warn!(error = %e, "Startup refresh failed, keeping session"),
        }

        Ok(SessionStatus {
            authenticated: self.is_authenticated()?,
            profile: self.current_profile()?,
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("liveness", &self.liveness)
            .field("logout_timeout", &self.logout_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::backend::TokenResponse;
    use crate::auth::error::BackendError;
    use crate::clock::{Clock, ManualClock};
    use crate::testutil::{make_token, setup_db, ScriptedBackend};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    struct Harness {
        backend: Arc<ScriptedBackend>,
        clock: Arc<ManualClock>,
        coordinator: Arc<RefreshCoordinator>,
        manager: SessionManager,
        store: TokenStore,
        _temp: tempfile::TempDir,
    }

    fn harness(backend: ScriptedBackend) -> Harness {
        let (db, temp) = setup_db();
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::default());
        let store = TokenStore::new(db.clone(), clock.clone());
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), backend.clone()));
        let manager = SessionManager::new(
            store.clone(),
            backend.clone(),
            coordinator.clone(),
            ProfileCache::new(db),
            LivenessConfig::default(),
            Duration::from_secs(2),
        );
        Harness {
            backend,
            clock,
            coordinator,
            manager,
            store,
            _temp: temp,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            email: "ada@bank.test".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn test_login_installs_session() {
        let h = harness(ScriptedBackend::new());
        h.backend.push_login(Ok(TokenResponse {
            access_token: Some("A1".into()),
            expires_in: Some(3600),
            refresh_token: Some("R1".into()),
            ..Default::default()
        }));

        let outcome = h.manager.login(&credentials()).await.unwrap();
        assert_eq!(outcome.session.access_token, "A1");
        assert_eq!(h.store.get_refresh_token().unwrap().as_deref(), Some("R1"));
        assert!(h.manager.is_authenticated().unwrap());
        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_login_with_legacy_token_field() {
        let h = harness(ScriptedBackend::new());
        let exp = h.clock.now().timestamp() + 600;
        let jwt = make_token(json!({ "exp": exp }));
        h.backend.push_login(Ok(TokenResponse {
            response_message: Some(jwt.clone()),
            ..Default::default()
        }));

        h.manager.login(&credentials()).await.unwrap();
        assert_eq!(h.store.get_access_token().unwrap(), Some(jwt));
        assert_eq!(
            h.store.get_expires_at().unwrap().map(|at| at.timestamp()),
            Some(exp)
        );
    }

    #[tokio::test]
    async fn test_failed_login_leaves_no_state() {
        let h = harness(ScriptedBackend::new());
        h.backend.push_login(Err(BackendError::Status {
            message: Some("Invalid email or password".into()),
            status: 401,
        }));

        let err = h.manager.login(&credentials()).await.unwrap_err();
        assert_eq!(err.user_message("Login failed"), "Invalid email or password");
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_without_token_is_an_error() {
        let h = harness(ScriptedBackend::new());
        h.backend.push_login(Ok(TokenResponse {
            response_message: Some("Login successful".into()),
            ..Default::default()
        }));

        let err = h.manager.login(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingAccessToken));
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_caches_profile() {
        let h = harness(ScriptedBackend::new());
        h.backend.push_login(Ok(TokenResponse {
            access_token: Some("A1".into()),
            account_info: Some(AccountInfo {
                account_name: Some("Ada Obi".into()),
                account_number: Some("2024000001".into()),
                ..Default::default()
            }),
            ..Default::default()
        }));

        h.manager.sign_in(&credentials()).await.unwrap();
        let profile = h.manager.current_profile().unwrap().unwrap();
        assert_eq!(profile.email, "ada@bank.test");
        assert_eq!(profile.account_number.as_deref(), Some("2024000001"));
    }

    #[tokio::test]
    async fn test_register_does_not_create_session() {
        let h = harness(ScriptedBackend::new());
        let payload = RegisterRequest {
            email: "ada@bank.test".into(),
            extra: Default::default(),
            full_name: "Ada Obi".into(),
            password: "secret".into(),
        };

        h.manager.register(&payload).await.unwrap();
        assert_eq!(h.backend.register_calls(), 1);
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_registration_skips_login() {
        let h = harness(ScriptedBackend::new());
        h.backend.fail_register(BackendError::Status {
            message: Some("Email already exists".into()),
            status: 409,
        });
        let payload = RegisterRequest {
            email: "ada@bank.test".into(),
            extra: Default::default(),
            full_name: "Ada Obi".into(),
            password: "secret".into(),
        };

        let err = h.manager.register_and_sign_in(&payload).await.unwrap_err();
        assert_eq!(err.user_message("Registration failed"), "Email already exists");
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_backend_fails() {
        let h = harness(
            ScriptedBackend::new().with_logout_error(BackendError::Network("unreachable".into())),
        );
        h.store.set_session("A1", Some("R1"), Some(60)).unwrap();
        h.manager.remember_profile("ada@bank.test", None);

        h.manager.logout().await.unwrap();
        assert_eq!(h.backend.logout_calls(), 1);
        assert!(h.store.get_access_token().unwrap().is_none());
        assert!(h.manager.current_profile().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_when_backend_hangs() {
        let h = harness(ScriptedBackend::new().with_logout_delay(Duration::from_secs(600)));
        h.store.set_session("A1", Some("R1"), Some(60)).unwrap();

        h.manager.logout().await.unwrap();
        assert!(h.store.get_access_token().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_started_during_logout_stays_discarded() {
        let h = harness(ScriptedBackend::gated().with_logout_delay(Duration::from_secs(1)));
        h.backend.push_refresh(Ok(TokenResponse {
            access_token: Some("A2".into()),
            expires_in: Some(60),
            refresh_token: Some("R2".into()),
            ..Default::default()
        }));
        h.store.set_session("A1", Some("R1"), Some(60)).unwrap();

        // The refresh begins while logout is still waiting on the backend
        // and is only let through once logout has returned
        let (logout, refresh) = tokio::join!(
            async {
                let result = h.manager.logout().await;
                h.backend.release();
                result
            },
            async {
                tokio::task::yield_now().await;
                h.coordinator.refresh_with_lock().await
            }
        );

        logout.unwrap();
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(refresh, Err(RefreshError::Invalidated));
        h.coordinator.settle().await;
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_refreshes_expiring_session() {
        let h = harness(ScriptedBackend::new());
        h.backend.push_refresh(Ok(TokenResponse {
            access_token: Some("A2".into()),
            expires_in: Some(3600),
            ..Default::default()
        }));
        h.store.set_session("A1", Some("R1"), Some(60)).unwrap();
        h.clock.advance(ChronoDuration::seconds(45));

        let status = h.manager.initialize().await.unwrap();
        assert!(status.authenticated);
        assert_eq!(h.store.get_access_token().unwrap().as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn test_initialize_drops_refused_session() {
        let h = harness(ScriptedBackend::new());
        h.backend.push_refresh(Err(BackendError::Status {
            message: None,
            status: 401,
        }));
        h.store.set_session("A1", Some("R1"), Some(60)).unwrap();
        h.clock.advance(ChronoDuration::seconds(120));

        let status = h.manager.initialize().await.unwrap();
        assert!(!status.authenticated);
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_keeps_session_when_offline() {
        let h = harness(ScriptedBackend::new());
        h.backend
            .push_refresh(Err(BackendError::Network("connection refused".into())));
        h.store.set_session("A1", Some("R1"), Some(60)).unwrap();
        h.clock.advance(ChronoDuration::seconds(40));

        let status = h.manager.initialize().await.unwrap();
        // Still inside the 60s lifetime, so usable
        assert!(status.authenticated);
        assert_eq!(h.store.get_access_token().unwrap().as_deref(), Some("A1"));
    }
}
