//! HTTP server for any2md.
//!
//! Exposes conversion, validation, status and session cleanup over JSON,
//! mounts the tool-call protocol at `POST /mcp`, and serves stored images
//! under `/static/{session}/{file}`.

use any2md::error::ErrorKind;
use any2md::output::ErrorDetail;
use any2md::request::SessionId;
use any2md::tools::{handle_rpc, RpcRequest};
use any2md::{
    ConversionResponse, ConversionService, ConvertError, FileContent, OptionOverrides, RawRequest,
    ServiceConfig,
};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "any2md-server", version, about = "any2md HTTP conversion server")]
struct Args {
    /// Listen address.
    #[arg(long, env = "ANY2MD_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen_addr: String,

    /// Documents converted at once.
    #[arg(long, env = "ANY2MD_MAX_CONCURRENT", default_value_t = 5)]
    max_concurrent: usize,

    /// Seconds a request may wait for a conversion slot.
    #[arg(long, env = "ANY2MD_ADMISSION_TIMEOUT", default_value_t = 300)]
    admission_timeout: u64,

    /// Deadline in seconds for each parse, sampling or layout step.
    #[arg(long, env = "ANY2MD_STAGE_TIMEOUT", default_value_t = 300)]
    stage_timeout: u64,

    /// Where extracted images are stored.
    #[arg(long, env = "ANY2MD_IMAGE_DIR", default_value = "./temp_images")]
    image_dir: PathBuf,

    /// Base URL under which images are linked; must resolve to `/static`
    /// on this server.
    #[arg(long, env = "ANY2MD_PUBLIC_BASE_URL", default_value = "http://localhost:3000/static")]
    public_base_url: String,

    /// Largest accepted input in MB.
    #[arg(long, env = "ANY2MD_MAX_FILE_SIZE_MB", default_value_t = 100)]
    max_file_size_mb: u64,

    /// Largest accepted request body in MB (base64 inflates uploads by a third).
    #[arg(long, env = "ANY2MD_MAX_BODY_MB", default_value_t = 512)]
    max_body_mb: usize,

    /// Hours image sessions are kept before the sweeper removes them.
    #[arg(long, env = "ANY2MD_RETENTION_HOURS", default_value_t = 24)]
    retention_hours: u64,

    /// Minutes between retention sweeps.
    #[arg(long, env = "ANY2MD_SWEEP_INTERVAL_MINS", default_value_t = 30)]
    sweep_interval_mins: u64,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "ANY2MD_PDFIUM_DIR")]
    pdfium_dir: Option<PathBuf>,
}

type AppState = Arc<ConversionService>;

/// An error rendered as `{"error": {...}}` with a status chosen by kind.
struct ApiError(ConvertError);

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = ErrorDetail::from(&self.0);
        (status_for(&detail), Json(json!({ "error": detail }))).into_response()
    }
}

fn status_for(detail: &ErrorDetail) -> StatusCode {
    match detail.code {
        "FILE_TOO_LARGE" => return StatusCode::PAYLOAD_TOO_LARGE,
        "UNSUPPORTED_FORMAT" => return StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => {}
    }
    match detail.kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::AdmissionTimeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ParseFailure => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(format!("any2md={level},tower_http={level}")).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("any2md=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut builder = ServiceConfig::builder()
        .max_concurrent_jobs(args.max_concurrent)
        .admission_timeout(Duration::from_secs(args.admission_timeout))
        .stage_timeout(Duration::from_secs(args.stage_timeout))
        .image_dir(args.image_dir.clone())
        .public_base_url(args.public_base_url.clone())
        .max_file_size(args.max_file_size_mb * 1024 * 1024)
        .retention(Duration::from_secs(args.retention_hours * 3600));
    if let Some(dir) = args.pdfium_dir {
        builder = builder.pdfium_library_dir(dir);
    }
    let service: AppState = Arc::new(ConversionService::new(
        builder.build().context("Invalid configuration")?,
    ));

    spawn_sweeper(
        Arc::clone(&service),
        Duration::from_secs(args.sweep_interval_mins.max(1) * 60),
    );

    let body_limit = args.max_body_mb * 1024 * 1024;

    let app = Router::new()
        .route("/health", get(status))
        .route("/api/v1/status", get(status))
        .route("/api/v1/formats", get(formats))
        .route("/api/v1/convert", post(convert))
        .route("/api/v1/validate", post(validate))
        .route("/api/v1/sessions/:id", delete(purge_session))
        .route("/api/v1/sessions/:id/images/:name", get(session_image))
        .route("/mcp", post(mcp))
        .nest_service("/static", ServeDir::new(&args.image_dir))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit));

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen_addr))?;
    info!(
        "any2md server listening on {} (images from {})",
        listener.local_addr().context("No local address")?,
        args.image_dir.display()
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

fn spawn_sweeper(service: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            service.sweep().await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn status(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.status())
}

async fn formats(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.formats())
}

/// Accepts a JSON body (single or batch shape) or a multipart upload with a
/// `file` part plus option fields.
async fn convert(
    State(service): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let raw = if content_type.starts_with("multipart/form-data") {
        let multipart = <Multipart as axum::extract::FromRequest<()>>::from_request(request, &())
            .await
            .map_err(|e| ConvertError::validation("body", e.body_text()))?;
        multipart_request(multipart).await?
    } else {
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| ConvertError::validation("body", e.to_string()))?;
        parse_json(&body)?
    };

    let response = service.convert(raw).await?;
    let status = match &response {
        ConversionResponse::Single(result) => result
            .error
            .as_ref()
            .map_or(StatusCode::OK, status_for),
        ConversionResponse::Batch(_) => StatusCode::OK,
    };
    Ok((status, Json(response)).into_response())
}

fn parse_json(body: &Bytes) -> Result<RawRequest, ConvertError> {
    serde_json::from_slice(body).map_err(|e| ConvertError::validation("body", e.to_string()))
}

/// Build a single-file request from a multipart form. Option fields arrive
/// as text; JSON scalars (`true`, `3`) are decoded, anything else stays a
/// string, and `sheet_names` is a comma list.
async fn multipart_request(mut multipart: Multipart) -> Result<RawRequest, ConvertError> {
    let mut filename = None;
    let mut content = None;
    let mut fields = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ConvertError::validation("body", e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if filename.is_none() {
                    filename = field.file_name().map(str::to_string);
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ConvertError::validation("file", e.body_text()))?;
                content = Some(FileContent::Binary(bytes));
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ConvertError::validation(name.clone(), e.body_text()))?;
                if name == "filename" {
                    filename = Some(text);
                    continue;
                }
                let value = if name == "sheet_names" {
                    Value::Array(
                        text.split(',')
                            .map(|s| Value::String(s.trim().to_string()))
                            .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                            .collect(),
                    )
                } else {
                    match serde_json::from_str::<Value>(&text) {
                        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
                        _ => Value::String(text),
                    }
                };
                fields.insert(name, value);
            }
        }
    }

    let options: OptionOverrides = serde_json::from_value(Value::Object(fields))
        .map_err(|e| ConvertError::validation("options", e.to_string()))?;
    Ok(RawRequest::Single {
        filename,
        content,
        options,
    })
}

#[derive(Debug, Deserialize)]
struct ValidateBody {
    filename: Option<String>,
    #[serde(alias = "file_content")]
    content: Option<FileContent>,
}

async fn validate(
    State(service): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: ValidateBody = serde_json::from_slice(&body)
        .map_err(|e| ConvertError::validation("body", e.to_string()))?;
    Ok(Json(
        service.validate(body.filename.as_deref(), body.content.as_ref()),
    ))
}

async fn purge_session(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session: SessionId = id.parse()?;
    let removed = service.purge_session(session).await?;
    Ok(Json(json!({
        "session_id": session,
        "status": "deleted",
        "files_removed": removed
    })))
}

async fn session_image(
    State(service): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let session: SessionId = id.parse()?;
    let bytes = service.image(session, &name).await?;
    let mime = if name.ends_with(".jpg") || name.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    };
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

async fn mcp(State(service): State<AppState>, body: Bytes) -> Response {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return Json(any2md::tools::RpcResponse::parse_error(e)).into_response();
        }
    };
    match handle_rpc(&service, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
