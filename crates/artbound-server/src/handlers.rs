//! Route handlers.
//!
//! Thin wrappers around `ArtCache`: they translate query parameters and cache
//! results into the JSON the browser script consumes.

use std::sync::Arc;

use artbound_core::cache::CacheStatus;
use artbound_core::models::{is_valid_month, MONTH_FORMAT};
use artbound_core::Entry;
use axum::{
    extract::{Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::server::{AppState, CACHE_ROUTE};

/// Response header carrying the number of entries whose download failed.
pub const FAILED_HEADER: &str = "x-artbound-failed";

/// An entry as served to the browser.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub id: String,
    #[serde(rename = "date")]
    pub month: String,
    pub name: String,
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Public URL of the cached file.
    pub content: String,
}

impl EntryView {
    /// Only resolved entries have a view; the URL is built from the
    /// percent-encoded on-disk name.
    pub fn from_entry(entry: Entry) -> Option<Self> {
        let disk_name = entry.file_path.as_ref()?.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            content: format!(
                "{}/{}",
                CACHE_ROUTE.trim_start_matches('/'),
                urlencoding::encode(&disk_name)
            ),
            file_name: entry.file_name.unwrap_or_default(),
            id: entry.id,
            month: entry.month,
            name: entry.name,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub current_month: String,
    #[serde(flatten)]
    pub cache: CacheStatus,
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    pub month: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Index data: when entries were last refreshed and which month to show first.
pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        current_month: chrono::Local::now().format(MONTH_FORMAT).to_string(),
        cache: state.cache.status().await,
    })
}

/// Reload entries from the spreadsheet.
pub async fn handle_update(State(state): State<Arc<AppState>>) -> Response {
    match state.cache.refresh().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            error!(error = %e, "Could not update entries");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Entries for one month, downloading missing files on the way.
pub async fn handle_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GetParams>,
) -> Response {
    let Some(month) = params.month.filter(|m| !m.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "\"month\" parameter is required.");
    };
    if !is_valid_month(&month) {
        return error_response(StatusCode::BAD_REQUEST, "\"month\" must look like YYYY-MM.");
    }

    let resolution = match state.cache.resolve(&month).await {
        Ok(resolution) => resolution,
        Err(e) => {
            error!(error = %e, month = %month, "Could not get entries");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not get entries.");
        }
    };

    let failed = resolution.failures().count();
    for failure in resolution.failures() {
        warn!(file_id = %failure.id, submitter = %failure.name, reason = %failure.reason, "Entry left out of response");
    }

    let entries: Vec<EntryView> = resolution
        .into_entries()
        .into_iter()
        .filter_map(EntryView::from_entry)
        .collect();

    let mut response = Json(entries).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(FAILED_HEADER),
        HeaderValue::from(failed),
    );
    response
}

/// Delete every cached file.
pub async fn handle_clear(State(state): State<Arc<AppState>>) -> Response {
    match state.cache.clear().await {
        Ok(()) => (StatusCode::OK, "Done.").into_response(),
        Err(e) => {
            error!(error = %e, "Could not delete cache");
            (StatusCode::INTERNAL_SERVER_ERROR, "Could not delete cache.").into_response()
        }
    }
}
