//! HTTP intake for a comparison session
//!
//! Browsers under test post their snapshots here; the server forwards them
//! to the session's [`SnapshotCoordinator`] and answers once any comparison
//! the submission triggered has finished.
//!
//! ## Routes
//!
//! - `POST /api/snapshots` submit one browser's snapshot set
//! - `GET /api/events` completed comparisons, oldest first
//! - `GET /api/status` active browsers, timers and pending identifiers

use crate::error::{CliError, CliResult};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use comparar::{
    ArtifactLayout, ArtifactStore, CompararError, ComparisonEvent, FsArtifactStore, PixelDiffer,
    SessionConfig, SessionStatus, SnapshotCoordinator, SnapshotEvent, Submission,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body; inline screenshots are big
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// HTTP intake configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,
    /// HTTP port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the HTTP port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Socket address to bind
    pub fn socket_addr(&self) -> CliResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| CliError::invalid_argument(format!("bad listen address {}: {e}", self.host)))
    }
}

/// Snapshot submission as posted by a browser
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    /// Submitting browser
    pub browser: String,
    /// Identifier grouping one snapshot set per browser
    pub id: String,
    /// Kind of event the snapshots were taken around
    #[serde(default)]
    pub event_type: String,
    /// Name of the event target
    #[serde(default)]
    pub event_name: String,
    /// Client timestamp (epoch ms)
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Snapshot files already present under the run's snapshots dir
    #[serde(default)]
    pub file_names: Vec<String>,
    /// Run date string
    #[serde(default)]
    pub date_string: Option<String>,
    /// Inline snapshots (base64 PNG, data URLs accepted), one per stage
    #[serde(default)]
    pub images: Vec<String>,
}

/// Answer to a snapshot submission
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    /// The submission was recorded
    pub accepted: bool,
    /// The submission completed its identifier's barrier
    pub comparison_triggered: bool,
    /// Outcome of the triggered comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_succeeded: Option<bool>,
}

/// Error answer, rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request
    BadRequest(String),
    /// Submission from a browser no longer in the session
    Conflict(String),
    /// Anything else
    Internal(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CompararError> for ApiError {
    fn from(err: CompararError) -> Self {
        match err {
            CompararError::InactiveBrowser { .. } => Self::Conflict(err.to_string()),
            CompararError::InvalidPath { .. } => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (Self::BadRequest(message) | Self::Conflict(message) | Self::Internal(message)) = self;
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    coordinator: SnapshotCoordinator,
    store: Arc<dyn ArtifactStore>,
    session: Arc<SessionConfig>,
    uploads: Arc<AtomicU64>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("coordinator", &self.coordinator)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create handler state around a running session
    #[must_use]
    pub fn new(
        coordinator: SnapshotCoordinator,
        store: Arc<dyn ArtifactStore>,
        session: SessionConfig,
    ) -> Self {
        // Seeded from the clock so a restarted server does not reuse names
        let first_upload = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            coordinator,
            store,
            session: Arc::new(session),
            uploads: Arc::new(AtomicU64::new(first_upload)),
        }
    }

    /// The session's coordinator
    #[must_use]
    pub const fn coordinator(&self) -> &SnapshotCoordinator {
        &self.coordinator
    }
}

/// Build the intake router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/snapshots", post(submit_snapshots))
        .route("/api/events", get(list_events))
        .route("/api/status", get(session_status))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Stage name of inline image `index` out of `count`
///
/// A pair is read as before/after, matching how stage labels are derived
/// from file names.
fn upload_stage(index: usize, count: usize) -> String {
    match (count, index) {
        (2, 0) => "before".to_string(),
        (2, 1) => "after".to_string(),
        _ => format!("stage{index}"),
    }
}

/// Decode a base64 image, with or without a `data:` URL prefix
fn decode_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let data = if encoded.starts_with("data:") {
        encoded.split_once(',').map_or("", |(_, data)| data)
    } else {
        encoded
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 image: {e}")))
}

async fn submit_snapshots(
    State(state): State<AppState>,
    payload: Result<Json<SnapshotPayload>, JsonRejection>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let Json(payload) = payload?;
    if payload.browser.is_empty() || payload.id.is_empty() {
        return Err(ApiError::BadRequest("browser and id are required".to_string()));
    }

    let date = state.session.resolve_date(payload.date_string.clone());
    Submission::new(&payload.id, &payload.browser, payload.file_names.clone())
        .with_date_string(&date)
        .validate()?;
    if !state.coordinator.is_active(&payload.browser).await? {
        return Err(CompararError::InactiveBrowser {
            browser: payload.browser,
        }
        .into());
    }

    let file_names = if payload.images.is_empty() {
        payload.file_names
    } else {
        let images = payload
            .images
            .iter()
            .map(|encoded| decode_image(encoded))
            .collect::<Result<Vec<_>, _>>()?;

        let upload = state.uploads.fetch_add(1, Ordering::Relaxed);
        let mut names = Vec::with_capacity(images.len());
        for (index, bytes) in images.iter().enumerate() {
            let stage = upload_stage(index, images.len());
            let name =
                ArtifactLayout::upload_file_name(&payload.id, &payload.browser, upload, &stage);
            state
                .store
                .write(&ArtifactLayout::snapshot_path(&date, &name), bytes)
                .await?;
            names.push(name);
        }
        names
    };
    if file_names.is_empty() {
        return Err(ApiError::BadRequest(
            "either fileNames or images is required".to_string(),
        ));
    }

    let mut submission = Submission::new(payload.id, payload.browser, file_names)
        .with_event(SnapshotEvent::new(payload.event_type, payload.event_name))
        .with_date_string(date);
    if let Some(timestamp) = payload.timestamp {
        submission = submission.with_timestamp(timestamp);
    }

    let outcome = state.coordinator.submit(submission).await?;
    let Some(comparison) = outcome.comparison else {
        return Ok(Json(SnapshotResponse {
            accepted: true,
            comparison_triggered: false,
            comparison_succeeded: None,
        }));
    };

    let succeeded = match comparison.wait().await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "comparison failed");
            false
        }
    };
    Ok(Json(SnapshotResponse {
        accepted: true,
        comparison_triggered: true,
        comparison_succeeded: Some(succeeded),
    }))
}

async fn list_events(State(state): State<AppState>) -> Json<Vec<ComparisonEvent>> {
    Json(state.coordinator.all_events())
}

async fn session_status(State(state): State<AppState>) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(state.coordinator.status().await?))
}

/// Comparison session served over HTTP
#[derive(Debug)]
pub struct SnapshotServer {
    config: ServerConfig,
    session: SessionConfig,
}

impl SnapshotServer {
    /// Create a server for a session
    #[must_use]
    pub const fn new(config: ServerConfig, session: SessionConfig) -> Self {
        Self { config, session }
    }

    /// Get the HTTP URL
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://localhost:{}", self.config.port)
    }

    /// Start the session and serve until Ctrl+C
    pub async fn run(&self) -> CliResult<()> {
        let addr = self.config.socket_addr()?;
        let store: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(&self.session.snapshot_destination_dir));
        let coordinator = SnapshotCoordinator::start(
            self.session.clone(),
            Arc::new(PixelDiffer),
            Arc::clone(&store),
        )?;
        let app = router(AppState::new(
            coordinator.clone(),
            store,
            self.session.clone(),
        ));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| CliError::server(format!("cannot bind {addr}: {e}")))?;
        info!(
            url = %self.http_url(),
            artifacts = %self.session.snapshot_destination_dir.display(),
            baseline = %self.session.base_browser,
            "snapshot intake listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| CliError::server(e.to_string()))?;

        coordinator.shutdown();
        info!("snapshot intake stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C, serving until killed");
        std::future::pending::<()>().await;
    }
}
