//! Authentication backend contract and its HTTP implementation.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::BackendError;
use crate::storage::models::AccountInfo;
use crate::tokens::claims;

pub const REGISTER_PATH: &str = "/api/auth/register";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Registration payload. Fields beyond the required ones are passed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub full_name: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

/// Account confirmation returned by registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub account_info: Option<AccountInfo>,
    #[serde(default)]
    pub response_code: Option<String>,
    #[serde(default)]
    pub response_message: Option<String>,
}

/// Login and refresh response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub account_info: Option<AccountInfo>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Older backends put the access token here
    #[serde(default)]
    pub response_message: Option<String>,
}

impl TokenResponse {
    /// The access token, if the response carries one that can be used.
    ///
    /// `responseMessage` only counts when it decodes as a compact token,
    /// since the same field carries plain text on other responses.
    pub fn usable_access_token(&self) -> Option<&str> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            return Some(token);
        }
        self.response_message
            .as_deref()
            .filter(|m| claims::decode(m).is_some())
    }

    /// A reissued refresh token, if any
    pub fn reissued_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

// ============================================================================
// Contract
// ============================================================================

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn register(&self, payload: &RegisterRequest) -> Result<RegisterResponse, BackendError>;

    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, BackendError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, BackendError>;

    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), BackendError>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Talks JSON over HTTP to the authentication service
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    base_url: Url,
    client: Client,
}

impl HttpAuthBackend {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Network(format!("Invalid URL for {path}: {e}")))
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, BackendError> {
        let response = self.client.post(self.url(path)?).json(body).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn register(&self, payload: &RegisterRequest) -> Result<RegisterResponse, BackendError> {
        let response = self.post(REGISTER_PATH, payload).await?;
        // Some deployments answer 201 with an empty body
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(RegisterResponse::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, BackendError> {
        let response = self.post(LOGIN_PATH, credentials).await?;
        Ok(response.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, BackendError> {
        let response = self
            .post(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await?;
        Ok(response.json().await?)
    }

    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), BackendError> {
        self.post(LOGOUT_PATH, &LogoutRequest { refresh_token })
            .await?;
        Ok(())
    }
}

/// Turn a non-success response into [`BackendError::Status`]
pub(crate) async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .bytes()
        .await
        .ok()
        .and_then(|bytes| error_message(&bytes));
    Err(BackendError::Status {
        message,
        status: status.as_u16(),
    })
}

/// Extract a human-readable message from an error body
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["responseMessage", "message", "error"]
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
}
