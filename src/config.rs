use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub liveness: LivenessConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub base_url: String,
    /// Upper bound on the best-effort logout notification
    pub logout_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Path prefixes that receive the bearer header
    pub authorized_prefixes: Vec<String>,
    pub base_url: String,
    /// Path prefixes that never receive it, even if authorized above
    pub excluded_prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Proactive refresh threshold
    pub refresh_buffer_seconds: u64,
    /// "Can this token be used right now" threshold
    pub usable_buffer_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            logout_timeout_ms: 3000,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            authorized_prefixes: vec!["/api/".to_string(), "/bankStatement".to_string()],
            base_url: "http://localhost:8080".to_string(),
            excluded_prefixes: vec!["/api/auth/".to_string()],
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_seconds: 30,
            usable_buffer_seconds: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let auth_defaults = AuthConfig::default();
        let api_defaults = ApiConfig::default();
        let liveness_defaults = LivenessConfig::default();

        let config = Config {
            api: ApiConfig {
                authorized_prefixes: env_list("AUTHORIZED_PREFIXES")
                    .unwrap_or(api_defaults.authorized_prefixes),
                base_url: std::env::var("API_BASE_URL").unwrap_or(api_defaults.base_url),
                excluded_prefixes: env_list("EXCLUDED_PREFIXES")
                    .unwrap_or(api_defaults.excluded_prefixes),
            },
            auth: AuthConfig {
                base_url: std::env::var("AUTH_BASE_URL").unwrap_or(auth_defaults.base_url),
                logout_timeout_ms: env_parse("LOGOUT_TIMEOUT_MS")?
                    .unwrap_or(auth_defaults.logout_timeout_ms),
                request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS")?
                    .unwrap_or(auth_defaults.request_timeout_ms),
            },
            liveness: LivenessConfig {
                refresh_buffer_seconds: env_parse("REFRESH_BUFFER_SECONDS")?
                    .unwrap_or(liveness_defaults.refresh_buffer_seconds),
                usable_buffer_seconds: env_parse("USABLE_BUFFER_SECONDS")?
                    .unwrap_or(liveness_defaults.usable_buffer_seconds),
            },
            storage: StorageConfig {
                data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_base_url("AUTH_BASE_URL", &self.auth.base_url)?;
        parse_base_url("API_BASE_URL", &self.api.base_url)?;

        if self.storage.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATA_DIR cannot be empty".to_string(),
            ));
        }

        if self.liveness.refresh_buffer_seconds < self.liveness.usable_buffer_seconds {
            return Err(ConfigError::ValidationError(format!(
                "REFRESH_BUFFER_SECONDS ({}) must be at least USABLE_BUFFER_SECONDS ({})",
                self.liveness.refresh_buffer_seconds, self.liveness.usable_buffer_seconds
            )));
        }

        if self.api.authorized_prefixes.is_empty() {
            tracing::warn!("No authorized prefixes configured; requests will never carry a token");
        }

        Ok(())
    }

    pub fn auth_base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url("AUTH_BASE_URL", &self.auth.base_url)
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url("API_BASE_URL", &self.api.base_url)
    }
}

fn parse_base_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::ValidationError(format!("{name} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::ValidationError(format!(
            "{name} must use http or https, got {other}"
        ))),
    }
}

fn env_parse(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{name} must be a number, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
