//! Resource API client with session handling.
//!
//! Before dispatch, a token that is about to expire is refreshed and the
//! bearer header attached where the policy allows it. A 401 triggers one
//! shared refresh and exactly one retry; if that does not help, the session
//! is cleared and the caller is told to log in again.

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::policy::AuthHeaderPolicy;
use crate::auth::backend::error_message;
use crate::auth::error::SESSION_EXPIRED_MESSAGE;
use crate::auth::RefreshCoordinator;
use crate::storage::DatabaseError;
use crate::tokens::TokenStore;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid request path {path}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Session expired")]
    SessionExpired,
    #[error("Request failed with status {status}")]
    Status { message: Option<String>, status: u16 },
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl ApiError {
    /// Text to show the user: the backend's message when it sent one,
    /// otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::SessionExpired => SESSION_EXPIRED_MESSAGE.to_string(),
            Self::Status {
                message: Some(message),
                ..
            } => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub body: Option<Value>,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            body: None,
            method,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Parsed JSON body; `Null` when the body was empty
    pub body: Value,
    pub status: u16,
}

pub struct ApiClient {
    base_url: Url,
    client: Client,
    coordinator: Arc<RefreshCoordinator>,
    policy: AuthHeaderPolicy,
    refresh_buffer_seconds: u64,
    store: TokenStore,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: Url,
        policy: AuthHeaderPolicy,
        store: TokenStore,
        coordinator: Arc<RefreshCoordinator>,
        refresh_buffer_seconds: u64,
    ) -> Self {
        Self {
            base_url,
            client,
            coordinator,
            policy,
            refresh_buffer_seconds,
            store,
        }
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let authorized = self.policy.should_attach(&request.path);

        let sent_token = if authorized {
            if let Err(e) = self
                .coordinator
                .refresh_if_expiring_soon(self.refresh_buffer_seconds)
                .await
            {
                warn!(error = %e, "Proactive token refresh failed, sending with current token");
            }
            self.store.get_access_token()?
        } else {
            None
        };

        let response = self.dispatch(request, sent_token.as_deref()).await?;
        let Some(sent_token) = sent_token else {
            return into_api_response(response).await;
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return into_api_response(response).await;
        }

        debug!(path = %request.path, "Request unauthorized, renewing session");

        // Another request may already have refreshed while this one was in flight
        let fresh_token = match self.store.get_access_token()? {
            Some(current) if current != sent_token => current,
            _ => match self.coordinator.refresh_with_lock().await {
                Ok(session) => session.access_token,
                Err(e) => {
                    warn!(error = %e, "Session refresh failed after 401");
                    return Err(self.expire_session());
                }
            },
        };

        let retried = self.dispatch(request, Some(&fresh_token)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "Request still unauthorized after refresh");
            return Err(self.expire_session());
        }
        into_api_response(retried).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(&ApiRequest::get(path)).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.send(&ApiRequest::post(path, body)).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::delete(path)).await
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| ApiError::InvalidPath {
                path: request.path.clone(),
                reason: e.to_string(),
            })?;

        let mut builder = self.client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        Ok(builder.send().await?)
    }

    /// Drop the session after an authorization failure that refreshing could not fix
    fn expire_session(&self) -> ApiError {
        if let Err(e) = self.coordinator.end_session() {
            warn!(error = %e, "Failed to clear expired session");
        }
        ApiError::SessionExpired
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

async fn into_api_response(response: Response) -> Result<ApiResponse, ApiError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            message: error_message(&bytes),
            status: status.as_u16(),
        });
    }

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(ApiResponse {
        body,
        status: status.as_u16(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::get("/bankStatement")
            .with_query("accountNumber", "2024000001")
            .with_query("startDate", "2025-01-01");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query.len(), 2);
        assert!(request.body.is_none());

        let request = ApiRequest::post("/api/user/transfer", serde_json::json!({ "amount": 500 }));
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.unwrap()["amount"], 500);
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            ApiError::SessionExpired.user_message("Transfer failed"),
            SESSION_EXPIRED_MESSAGE
        );
        let err = ApiError::Status {
            message: Some("Insufficient balance".into()),
            status: 400,
        };
        assert_eq!(err.user_message("Transfer failed"), "Insufficient balance");
        let err = ApiError::Status {
            message: None,
            status: 500,
        };
        assert_eq!(err.user_message("Transfer failed"), "Transfer failed");
    }
}
