use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The process-wide authentication state.
///
/// Only exists while an access token is stored; a missing access token is
/// the canonical "logged out" state and makes the other fields meaningless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    /// When the access token stops being usable, if known
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
}

/// Account details returned alongside a login response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub account_balance: Option<serde_json::Value>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
}

/// User-facing profile cached after login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub email: String,
}

impl UserProfile {
    pub fn from_login(email: &str, info: Option<&AccountInfo>) -> Self {
        Self {
            account_name: info.and_then(|i| i.account_name.clone()),
            account_number: info.and_then(|i| i.account_number.clone()),
            email: email.to_string(),
        }
    }
}
