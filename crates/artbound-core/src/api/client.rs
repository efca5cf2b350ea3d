//! Client for the Google Sheets and Drive REST APIs.
//!
//! Provides `GoogleClient`, the production `ArtSource`: it reads the
//! submission rows from a spreadsheet range and fetches uploaded files by id.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{ClientSecrets, RefreshResponse, TokenStore};

use super::{ApiError, ArtSource, SheetRow};

// ============================================================================
// Constants
// ============================================================================

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// HTTP request timeout in seconds.
/// Also bounds file downloads, which block the requesting page.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    name: String,
}

/// Google API client bound to one spreadsheet range.
pub struct GoogleClient {
    client: Client,
    spreadsheet_id: String,
    spreadsheet_range: String,
    secrets: ClientSecrets,
    token: Mutex<TokenStore>,
}

impl GoogleClient {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        spreadsheet_range: impl Into<String>,
        secrets: ClientSecrets,
        token: TokenStore,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            spreadsheet_range: spreadsheet_range.into(),
            secrets,
            token: Mutex::new(token),
        })
    }

    /// Current access token, refreshing it first when it is about to expire.
    async fn access_token(&self, force_refresh: bool) -> Result<String> {
        let mut store = self.token.lock().await;
        if force_refresh || store.needs_refresh() {
            let refresh_token = store
                .refresh_token()
                .ok_or_else(|| ApiError::MissingToken("token.json has no refresh_token".to_string()))?
                .to_string();
            let response = self.refresh_access_token(&refresh_token).await?;
            store.apply_refresh(response);
            if let Err(e) = store.save() {
                warn!(error = %e, "Could not persist refreshed token");
            }
        }

        store
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| ApiError::MissingToken("token.json has no access_token".to_string()).into())
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshResponse> {
        info!("Refreshing OAuth access token");
        let response = self
            .client
            .post(&self.secrets.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ])
            .send()
            .await
            .context("Failed to send token refresh request")?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .context("Failed to parse token refresh response")
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Authenticated GET with backoff on 429 and a single token refresh on 401.
    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut refreshed = false;

        loop {
            let token = self.access_token(false).await?;
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&token)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                StatusCode::UNAUTHORIZED if !refreshed => {
                    refreshed = true;
                    debug!(url = %url, "Access token rejected, refreshing");
                    self.access_token(true).await?;
                }
                _ => return Self::check_response(response).await,
            }
        }
    }

    fn values_url(&self) -> Result<Url> {
        let mut url = Url::parse(SHEETS_BASE_URL)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Sheets base URL cannot be a base"))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&self.spreadsheet_range);
        Ok(url)
    }

    fn file_url(file_id: &str) -> Result<Url> {
        let mut url = Url::parse(DRIVE_FILES_URL)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Drive base URL cannot be a base"))?
            .push(file_id);
        Ok(url)
    }
}

fn cell_to_string(cell: &serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ArtSource for GoogleClient {
    async fn fetch_rows(&self) -> Result<Vec<SheetRow>> {
        let response = self.get(self.values_url()?).await?;
        let range: ValueRange = response
            .json()
            .await
            .context("Failed to parse spreadsheet values")?;

        debug!(rows = range.values.len(), "Fetched spreadsheet rows");
        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }

    async fn file_name(&self, file_id: &str) -> Result<String> {
        let mut url = Self::file_url(file_id)?;
        url.query_pairs_mut().append_pair("fields", "name");
        let file: DriveFile = self
            .get(url)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse metadata for file {}", file_id))?;
        Ok(file.name)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let mut url = Self::file_url(file_id)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to read content of file {}", file_id))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn client(range: &str) -> GoogleClient {
        let secrets = ClientSecrets {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        };
        GoogleClient::new("sheet123", range, secrets, TokenStore::new(PathBuf::from("token.json")))
            .unwrap()
    }

    #[test]
    fn test_values_url_encodes_range() {
        let url = client("Form Responses 1!A2:D").values_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet123/values/Form%20Responses%201!A2:D"
        );
    }

    #[test]
    fn test_file_url() {
        let url = GoogleClient::file_url("abc_123").unwrap();
        assert_eq!(url.as_str(), "https://www.googleapis.com/drive/v3/files/abc_123");
    }

    #[test]
    fn test_parse_value_range() {
        let json = r#"{"range":"Sheet1!A2:D3","majorDimension":"ROWS","values":[["21/03/2024 14.05.33","Mario","",
            "https://drive.google.com/open?id=X"],["22/03/2024 10.00.00",42]]}"#;
        let range: ValueRange = serde_json::from_str(json).unwrap();
        let rows: Vec<SheetRow> = range
            .values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "Mario");
        assert_eq!(rows[1][1], "42");

        let empty: ValueRange = serde_json::from_str(r#"{"range":"Sheet1!A2:D"}"#).unwrap();
        assert!(empty.values.is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_reported() {
        let client = client("A1:D");
        let err = client.access_token(false).await.unwrap_err();
        assert!(err.to_string().contains("No OAuth token available"));
    }
}
