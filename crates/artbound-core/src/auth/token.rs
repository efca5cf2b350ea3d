use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Refresh this long before the access token actually expires.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

/// OAuth token as stored in `token.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenData {
    /// A token without an expiry is assumed valid until the API says otherwise.
    pub fn is_expired(&self) -> bool {
        self.expiry.map(|e| Utc::now() > e).unwrap_or(false)
    }

    /// Check if the token will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.expiry
            .map(|e| Utc::now() > e - Duration::seconds(TOKEN_REFRESH_BUFFER_SECS))
            .unwrap_or(false)
    }
}

/// Response of the token endpoint for a `refresh_token` grant.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Token persisted on disk and kept up to date after refreshes.
pub struct TokenStore {
    path: PathBuf,
    pub data: Option<TokenData>,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, data: None }
    }

    /// Load the token from disk. Returns false if no token file exists.
    pub fn load(&mut self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file {}", self.path.display()))?;
        let data: TokenData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file {}", self.path.display()))?;
        self.data = Some(data);
        Ok(true)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = self.data {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(data)?;
            std::fs::write(&self.path, contents)?;
            info!(path = %self.path.display(), "Saved OAuth token");
        }
        Ok(())
    }

    /// Merge a refresh response into the stored token, keeping the old refresh
    /// token when the endpoint does not rotate it.
    pub fn apply_refresh(&mut self, response: RefreshResponse) {
        let previous_refresh = self.data.as_ref().and_then(|d| d.refresh_token.clone());
        self.data = Some(TokenData {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expiry: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        });
    }

    pub fn access_token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.refresh_token.as_deref())
    }

    pub fn needs_refresh(&self) -> bool {
        self.data.as_ref().map(|d| d.needs_refresh()).unwrap_or(true)
    }
}
