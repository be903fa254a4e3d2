//! HTTP server: the telemetry page and its JSON API.
//!
//! Routes:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /` | Telemetry page with the camera stream embedded |
//! | `GET /static/{file}` | Page stylesheet and script |
//! | `GET /api/telemetry` | Latest telemetry record |
//! | `POST /api/start_log` | Start a flight log |
//! | `POST /api/stop_log` | Stop the flight log |
//! | `GET /api/log_status` | Flight log state |
//! | `GET /api/history` | Archived samples, newest first, or a time window |
//! | `GET /api/logs` | Flight log sessions, newest first |
//! | `GET /health` | Liveness check |

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{BatteryConfig, Config};
use crate::error::{Error, Result};
use crate::recorder::{lock_archive, Recorder, SharedStorage};
use crate::station::{Retention, Sampler, Station};
use crate::storage::Storage;
use crate::telemetry::{unix_seconds, Telemetry};

/// Placeholder in `index.html` replaced with the camera stream URL.
const STREAM_URL_PLACEHOLDER: &str = "{{STREAM_URL}}";

/// Placeholder in `index.html` replaced with the low battery threshold.
const LOW_BATTERY_PLACEHOLDER: &str = "{{LOW_BATTERY_PERCENT}}";

/// Default and maximum `limit` for `/api/history`.
const HISTORY_DEFAULT: usize = 60;
const HISTORY_MAX: usize = 3600;

/// Default and maximum `limit` for `/api/logs`.
const LOGS_DEFAULT: usize = 20;
const LOGS_MAX: usize = 500;

/// Page, stylesheet and script compiled into the binary.
#[derive(RustEmbed)]
#[folder = "assets"]
struct Assets;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    station: Arc<Station>,
    recorder: Arc<Recorder>,
    archive: Option<SharedStorage>,
    latest: watch::Receiver<Option<Telemetry>>,
    stream_url: Arc<str>,
    low_battery_percent: u8,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("stream_url", &self.stream_url)
            .field("archive", &self.archive.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub fn new(
        station: Arc<Station>,
        recorder: Arc<Recorder>,
        archive: Option<SharedStorage>,
        latest: watch::Receiver<Option<Telemetry>>,
        stream_url: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            station,
            recorder,
            archive,
            latest,
            stream_url: stream_url.into(),
            low_battery_percent: BatteryConfig::default().low_percent,
        }
    }

    /// Battery percentage the page flags as low.
    #[must_use]
    pub fn with_low_battery(mut self, percent: u8) -> Self {
        self.low_battery_percent = percent;
        self
    }
}

/// Error returned by API handlers, rendered as `{"success": false, "error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    /// The request body was unusable.
    BadRequest(String),
    /// Something failed on the station.
    Internal(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Internal(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(err) => {
                error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

/// Body of `POST /api/start_log`. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct StartLogRequest {
    /// Base name of the log file.
    pub filename: Option<String>,
    /// Note written at the top of the file.
    pub note: Option<String>,
}

/// `?limit=N` query.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    /// Requested number of entries.
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self, default: usize, max: usize) -> usize {
        resolve_limit(self.limit, default, max)
    }
}

/// `/api/history` query. With `since` or `until` (Unix seconds) the samples
/// in that window are returned oldest first.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Requested number of samples.
    pub limit: Option<usize>,
    /// Window start; defaults to the epoch when only `until` is given.
    pub since: Option<f64>,
    /// Window end; defaults to now when only `since` is given.
    pub until: Option<f64>,
}

impl HistoryQuery {
    fn window(&self) -> std::result::Result<Option<(DateTime<Utc>, DateTime<Utc>)>, ApiError> {
        fn bound(
            name: &str,
            secs: Option<f64>,
            default: DateTime<Utc>,
        ) -> std::result::Result<DateTime<Utc>, ApiError> {
            secs.map_or(Ok(default), |secs| {
                unix_seconds::from_f64(secs)
                    .ok_or_else(|| ApiError::BadRequest(format!("invalid {name}: {secs}")))
            })
        }

        if self.since.is_none() && self.until.is_none() {
            return Ok(None);
        }
        let since = bound("since", self.since, DateTime::<Utc>::UNIX_EPOCH)?;
        let until = bound("until", self.until, Utc::now())?;
        if since > until {
            return Err(ApiError::BadRequest("since is after until".to_string()));
        }
        Ok(Some((since, until)))
    }
}

fn resolve_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}

#[derive(Debug, Serialize)]
struct HealthInfo {
    status: &'static str,
    service: &'static str,
    timestamp: i64,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/static/{file}", get(static_asset))
        .route("/api/telemetry", get(telemetry))
        .route("/api/start_log", post(start_log))
        .route("/api/stop_log", post(stop_log))
        .route("/api/log_status", get(log_status))
        .route("/api/history", get(history))
        .route("/api/logs", get(logs))
        .route("/health", get(health))
        .with_state(state)
}

/// Escape text for use inside an HTML attribute.
fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the page with the stream URL and battery threshold filled in.
fn render_index(stream_url: &str, low_battery_percent: u8) -> Option<String> {
    let page = Assets::get("index.html")?;
    let page = String::from_utf8_lossy(&page.data);
    Some(
        page.replace(STREAM_URL_PLACEHOLDER, &escape_attr(stream_url))
            .replace(LOW_BATTERY_PLACEHOLDER, &low_battery_percent.to_string()),
    )
}

async fn index(State(state): State<AppState>) -> Response {
    match render_index(&state.stream_url, state.low_battery_percent) {
        Some(page) => Html(page).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "index.html missing").into_response(),
    }
}

async fn static_asset(Path(file): Path<String>) -> Response {
    if file == "index.html" {
        return (StatusCode::NOT_FOUND, "Asset not found").into_response();
    }
    match Assets::get(&file) {
        Some(content) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref())],
                Body::from(content.data.into_owned()),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Asset not found").into_response(),
    }
}

async fn telemetry(State(state): State<AppState>) -> Json<Telemetry> {
    let latest = state.latest.borrow().clone();
    match latest {
        Some(sample) => Json(sample),
        None => Json(state.station.sample().await),
    }
}

async fn start_log(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let request: StartLogRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartLogRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?
    };

    let path = state
        .recorder
        .start(request.filename.as_deref(), request.note.as_deref())
        .await?;
    Ok(Json(json!({"success": true, "logfile": path})))
}

async fn stop_log(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let body = match state.recorder.stop().await? {
        Some(log) => json!({
            "success": true,
            "logfile": log.logfile,
            "rows": log.rows,
            "digest": log.digest,
        }),
        None => json!({"success": true}),
    };
    Ok(Json(body))
}

async fn log_status(State(state): State<AppState>) -> Response {
    Json(state.recorder.status().await).into_response()
}

async fn history(
    State(state): State<AppState>,
    query: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> std::result::Result<Json<Vec<Telemetry>>, ApiError> {
    let Query(query) = query?;
    let limit = resolve_limit(query.limit, HISTORY_DEFAULT, HISTORY_MAX);
    let window = query.window()?;

    let Some(archive) = &state.archive else {
        return Ok(Json(Vec::new()));
    };
    let archive = lock_archive(archive);
    let samples = match window {
        Some((since, until)) => archive.samples_between(since, until, limit)?,
        None => archive.recent_samples(limit)?,
    };
    Ok(Json(samples))
}

async fn logs(
    State(state): State<AppState>,
    query: std::result::Result<Query<LimitQuery>, QueryRejection>,
) -> std::result::Result<Response, ApiError> {
    let Query(query) = query?;
    let limit = query.resolve(LOGS_DEFAULT, LOGS_MAX);
    let logs = match &state.archive {
        Some(archive) => lock_archive(archive).flight_logs(limit)?,
        None => Vec::new(),
    };
    Ok(Json(logs).into_response())
}

async fn health() -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "healthy",
        service: "groundstation",
        timestamp: Utc::now().timestamp(),
    })
}

/// Resolve when Ctrl+C or SIGTERM arrives.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        () = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let address = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::server(address, e.to_string()))
}

/// Run the ground station: sampler, archive, flight logs and HTTP server.
///
/// Returns after a shutdown signal, once the sampler has closed any open log.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or the port cannot be bound.
pub async fn run(config: &Config) -> Result<()> {
    let archive: Option<SharedStorage> = if config.sampler.archive {
        let storage = Storage::open(config.database_path())?;
        info!("Archiving samples to {}", storage.path().display());
        Some(Arc::new(std::sync::Mutex::new(storage)))
    } else {
        info!("Sample archive disabled");
        None
    };

    let mut recorder = Recorder::new(config.log_dir(), config.recorder.default_name.clone());
    if let Some(archive) = &archive {
        recorder = recorder.with_archive(Arc::clone(archive));
    }
    info!("Flight logs are written to {}", recorder.log_dir().display());
    let recorder = Arc::new(recorder);
    let station = Arc::new(Station::from_config(config));

    let (sampler, latest) = Sampler::new(
        Arc::clone(&station),
        Arc::clone(&recorder),
        config.sample_interval(),
    );
    let sampler = sampler.with_battery_alarm(config.battery.low_percent);
    let sampler = match &archive {
        Some(archive) => sampler.with_archive(Arc::clone(archive), Retention::from_config(config)),
        None => sampler,
    };

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Error::server(address.clone(), e.to_string()))?;
    info!("Ground station listening on http://{}", address);
    info!("Camera stream: {}", config.camera.stream_url());

    let (stop_tx, stop_rx) = watch::channel(false);
    let sampler_task = tokio::spawn(sampler.run(stop_rx));

    let state = AppState::new(
        station,
        recorder,
        archive,
        latest,
        config.camera.stream_url(),
    )
    .with_low_battery(config.battery.low_percent);
    let served = serve(listener, router(state), shutdown_signal()).await;

    if stop_tx.send(true).is_err() {
        warn!("Sampler exited before shutdown");
    }
    if let Err(e) = sampler_task.await {
        error!("Sampler task failed: {}", e);
    }

    info!("Ground station shut down");
    served
}
