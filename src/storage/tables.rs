use redb::TableDefinition;

/// Session entries: storage key -> string value
pub const SESSION_ENTRIES: TableDefinition<&str, &str> = TableDefinition::new("session_entries");

/// Key holding the current access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Key holding the refresh token, when the backend issued one
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Key holding the access token expiry (epoch milliseconds, decimal)
pub const EXPIRES_AT_KEY: &str = "tokenExpiresAt";

/// Key holding the cached user profile (JSON)
pub const PROFILE_KEY: &str = "user";
