use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth client secrets as downloaded from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// `credentials.json` wraps the secrets in an `installed` or `web` section.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read client secret file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Unable to parse client secret file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(contents)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| anyhow::anyhow!("Expected an \"installed\" or \"web\" section"))
    }
}
