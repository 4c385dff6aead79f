//! Single-flight token refresh.
//!
//! At most one refresh call is outstanding at any time. The first caller
//! installs an in-flight handle and spawns the refresh; every caller that
//! arrives while it runs attaches to the same handle and receives the same
//! outcome. The handle is installed under a lock before the first await, so
//! two callers can never both observe "idle" and each start a refresh.
//!
//! The refresh runs on its own task: a caller that stops waiting does not
//! cancel it for the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::{AuthBackend, TokenResponse};
use super::error::RefreshError;
use crate::storage::models::Session;
use crate::storage::DatabaseError;
use crate::tokens::TokenStore;

pub type RefreshOutcome = Result<Session, RefreshError>;

type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

enum RefreshState {
    Idle,
    Refreshing(OutcomeReceiver),
}

pub struct RefreshCoordinator {
    backend: Arc<dyn AuthBackend>,
    /// Bumped when the session is cleared; a refresh started under an older
    /// generation must not write its result back.
    generation: Arc<AtomicU64>,
    state: Arc<Mutex<RefreshState>>,
    store: TokenStore,
}

impl RefreshCoordinator {
    pub fn new(store: TokenStore, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend,
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(RefreshState::Idle)),
            store,
        }
    }

    /// Exchange the refresh token for a new session, sharing any refresh
    /// already in flight.
    ///
    /// On success the new session has been stored. On failure the store is
    /// left untouched; clearing it is the caller's decision.
    pub async fn refresh_with_lock(&self) -> RefreshOutcome {
        let receiver = self.attach_or_start()?;
        wait_for_outcome(receiver).await
    }

    /// Refresh ahead of time if the access token expires within `buffer_seconds`.
    ///
    /// Returns `None` without any network call when there is nothing to
    /// refresh or the token is still comfortably valid.
    pub async fn refresh_if_expiring_soon(
        &self,
        buffer_seconds: u64,
    ) -> Result<Option<Session>, RefreshError> {
        let has_tokens =
            self.store.get_access_token()?.is_some() && self.store.get_refresh_token()?.is_some();
        if !has_tokens || !self.store.is_expiring_soon(buffer_seconds)? {
            return Ok(None);
        }

        debug!(buffer_seconds, "Access token expiring soon, refreshing");
        self.refresh_with_lock().await.map(Some)
    }

    /// Stop any in-flight refresh from storing its result.
    ///
    /// Called before the session is cleared, so a refresh that completes
    /// after logout cannot bring the session back.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Invalidate and clear the stored session as one step.
    ///
    /// Holds the state lock throughout, so no refresh can start in between
    /// and no in-flight refresh can write its result after the clear.
    pub fn end_session(&self) -> Result<(), DatabaseError> {
        let _state = self.lock_state();
        self.invalidate();
        self.store.clear()
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(&*self.lock_state(), RefreshState::Refreshing(rx) if rx.has_changed().is_ok())
    }

    /// Wait for an in-flight refresh, if any, to finish
    pub async fn settle(&self) {
        let receiver = match &*self.lock_state() {
            RefreshState::Refreshing(rx) => rx.clone(),
            RefreshState::Idle => return,
        };
        let _ = wait_for_outcome(receiver).await;
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach to the in-flight refresh, or install a new one.
    ///
    /// Runs without suspending: the check and the install happen under one lock.
    fn attach_or_start(&self) -> Result<OutcomeReceiver, RefreshError> {
        let mut state = self.lock_state();

        if let RefreshState::Refreshing(rx) = &*state {
            if rx.has_changed().is_ok() {
                debug!("Joining in-flight token refresh");
                return Ok(rx.clone());
            }
            // The task went away without reporting (panicked); start over
            warn!("In-flight token refresh vanished, starting a new one");
            *state = RefreshState::Idle;
        }

        let refresh_token = self
            .store
            .get_refresh_token()?
            .ok_or(RefreshError::NoRefreshToken)?;

        let (tx, rx) = watch::channel(None);
        *state = RefreshState::Refreshing(rx.clone());
        let started_in = self.generation.load(Ordering::SeqCst);
        drop(state);

        let backend = Arc::clone(&self.backend);
        let generation = Arc::clone(&self.generation);
        let shared_state = Arc::clone(&self.state);
        let store = self.store.clone();
        tokio::spawn(async move {
            let response = backend.refresh(&refresh_token).await;

            // The generation check and the write happen under the state lock,
            // the same lock `end_session` clears under
            let mut state = shared_state.lock().unwrap_or_else(|e| e.into_inner());
            let outcome = match response {
                Err(e) => Err(e.into()),
                Ok(_) if generation.load(Ordering::SeqCst) != started_in => {
                    Err(RefreshError::Invalidated)
                }
                Ok(response) => store_refreshed(&store, &response, &refresh_token),
            };
            *state = RefreshState::Idle;
            drop(state);

            match &outcome {
                Ok(_) => info!("Token refresh succeeded"),
                Err(e) => warn!(error = %e, "Token refresh failed"),
            }
            tx.send_replace(Some(outcome));
        });

        Ok(rx)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

fn store_refreshed(
    store: &TokenStore,
    response: &TokenResponse,
    refresh_token: &str,
) -> RefreshOutcome {
    let access_token = response
        .usable_access_token()
        .ok_or(RefreshError::InvalidRefreshResponse)?;
    // Keep the current refresh token unless the backend rotated it
    let refresh_token = response.reissued_refresh_token().unwrap_or(refresh_token);

    store
        .set_session(access_token, Some(refresh_token), response.expires_in)?
        .ok_or(RefreshError::InvalidRefreshResponse)
}

async fn wait_for_outcome(mut receiver: OutcomeReceiver) -> RefreshOutcome {
    let outcome = receiver
        .wait_for(Option::is_some)
        .await
        .map_err(|_| RefreshError::Aborted)?;
    match &*outcome {
        Some(outcome) => outcome.clone(),
        None => Err(RefreshError::Aborted),
    }
}
