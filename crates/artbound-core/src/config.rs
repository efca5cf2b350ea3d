//! Application configuration.
//!
//! Values come from the process environment; the binary loads a `.env` file
//! into the environment first when one is present.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Application name used for the config directory fallback
const APP_NAME: &str = "artbound";

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_CACHE_DIR: &str = "art";
const DEFAULT_STATIC_DIR: &str = "static";
const CREDENTIALS_FILE: &str = "credentials.json";
const TOKEN_FILE: &str = "token.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub spreadsheet_id: String,
    pub spreadsheet_range: String,
    pub host: String,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub static_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let port = match get("PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            spreadsheet_id: required("SPREADSHEET_ID")?,
            spreadsheet_range: required("SPREADSHEET_RANGE")?,
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            cache_dir: get("ARTBOUND_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            static_dir: get("ARTBOUND_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
            credentials_path: get("GOOGLE_CREDENTIALS")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_secret_path(CREDENTIALS_FILE)),
            token_path: get("GOOGLE_TOKEN")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_secret_path(TOKEN_FILE)),
            log_dir: get("ARTBOUND_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Prefer a file in the working directory, then `~/.config/artbound/`.
fn default_secret_path(file: &str) -> PathBuf {
    let local = PathBuf::from(file);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME).join(file))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("SPREADSHEET_ID", "sheet"),
            ("SPREADSHEET_RANGE", "A2:D"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.cache_dir, PathBuf::from("art"));
        assert_eq!(config.static_dir, PathBuf::from("static"));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_missing_required() {
        let err = Config::from_lookup(lookup(&[("SPREADSHEET_RANGE", "A2:D")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SPREADSHEET_ID")));

        let err = Config::from_lookup(lookup(&[("SPREADSHEET_ID", "sheet"), ("SPREADSHEET_RANGE", " ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SPREADSHEET_RANGE")));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SPREADSHEET_ID", "sheet"),
            ("SPREADSHEET_RANGE", "A2:D"),
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("ARTBOUND_CACHE_DIR", "/var/cache/artbound"),
            ("GOOGLE_TOKEN", "/etc/artbound/token.json"),
            ("ARTBOUND_LOG_DIR", "logs"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/artbound"));
        assert_eq!(config.token_path, PathBuf::from("/etc/artbound/token.json"));
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_lookup(lookup(&[
            ("SPREADSHEET_ID", "sheet"),
            ("SPREADSHEET_RANGE", "A2:D"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
