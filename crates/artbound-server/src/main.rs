//! artbound - browse art submissions from a Google Form.
//!
//! Reads submissions from the form's response spreadsheet, caches the uploaded
//! files locally on demand and serves them to the browser front-end.

mod handlers;
mod server;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use artbound_core::auth::{ClientSecrets, TokenStore};
use artbound_core::{ArtCache, Config, GoogleClient};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use server::AppState;

/// Prefix of the daily rolling log files in `ARTBOUND_LOG_DIR`.
const LOG_FILE_PREFIX: &str = "artbound.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and additionally to a daily rolling file when a log
/// directory is configured. The returned guard must live until exit so the
/// file writer gets flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env()?;
    let _log_guard = init_tracing(&config);
    if dotenv.is_err() {
        info!("No .env file provided");
    }
    info!("artbound starting");

    let secrets = ClientSecrets::load(&config.credentials_path)?;
    let mut token = TokenStore::new(config.token_path.clone());
    let has_token = token
        .load()
        .context("Could not load OAuth token")?;
    if !has_token {
        anyhow::bail!(
            "No OAuth token found at {}. Authorize the app once and save the token there.",
            config.token_path.display()
        );
    }
    if let Some(data) = token.data.as_ref().filter(|data| data.is_expired()) {
        if data.refresh_token.is_none() {
            anyhow::bail!(
                "OAuth token at {} has expired and has no refresh token. Authorize the app again.",
                config.token_path.display()
            );
        }
        info!("Stored access token has expired, it will be refreshed on first use");
    }

    let client = GoogleClient::new(
        config.spreadsheet_id.clone(),
        config.spreadsheet_range.clone(),
        secrets,
        token,
    )?;
    let cache = ArtCache::new(Arc::new(client), config.cache_dir.clone())
        .context("Could not list cached entries")?;

    // Load entries once at startup; the server is still useful without them
    if let Err(e) = cache.refresh().await {
        warn!(error = %e, "Initial update failed, starting with no entries");
    }

    let state = Arc::new(AppState {
        cache: Arc::new(cache),
    });
    let app = server::router(state, &config.cache_dir, &config.static_dir);
    server::serve(app, &config.bind_addr()).await?;

    info!("artbound shutting down");
    Ok(())
}
