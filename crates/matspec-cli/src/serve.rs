//! Interactive surface: single-page UI plus a JSON API over the same pipeline.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use matspec_ai::{CompletionProvider, RetryPolicy, SectionOptions};
use matspec_core::{ImageInput, MaterialRecord, Settings, SpecificationSection};
use matspec_store::{StoreError, encode_image, is_supported_image};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::display;
use crate::pipeline::{EMPTY_BRIEF, NoProgress, PipelineError, PipelineOptions, run_pipeline};

/// Largest accepted request body.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn CompletionProvider>,
    pub settings: Arc<Settings>,
    pub policy: RetryPolicy,
    pub started: DateTime<Utc>,
}

impl AppState {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: Settings) -> Self {
        Self {
            policy: RetryPolicy::from(&settings.retry),
            provider,
            settings: Arc::new(settings),
            started: Utc::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/specifications", post(create_specification))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn run_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");
    display::ok(&format!("Open http://{addr}/ in your browser (Ctrl-C to stop)"));
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// ── Errors ──

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NoValidImages(String),
    #[error("{0}")]
    AuthFailed(String),
    #[error("{0}")]
    UpstreamFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NoValidImages(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "NO_VALID_IMAGES", msg)
            }
            ApiError::AuthFailed(msg) => (StatusCode::BAD_GATEWAY, "AUTH_FAILED", msg),
            ApiError::UpstreamFailed(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED", msg),
        };
        warn!(code, message = %message, "request failed");
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match &e {
            PipelineError::NoImages => ApiError::NoValidImages(
                "No valid images to analyse. Upload one or more PNG or JPEG files.".into(),
            ),
            PipelineError::Auth(f) => ApiError::AuthFailed(format!(
                "The API refused the credential ({}). Check ANTHROPIC_API_KEY and restart the server.",
                f.message
            )),
            PipelineError::NothingAnalyzed { failures }
            | PipelineError::NothingGenerated { failures } => {
                let detail = failures
                    .first()
                    .map(|f| f.failure.explain())
                    .unwrap_or_default();
                ApiError::UpstreamFailed(format!("{e}. {detail}").trim_end().to_string())
            }
        }
    }
}

// ── Handlers ──

async fn index() -> Html<&'static str> {
    Html(include_str!("ui.html"))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.started);
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "matspec".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

#[derive(Debug, Serialize)]
pub struct ImageStatus {
    pub name: String,
    /// `analyzed` or `failed`.
    pub status: &'static str,
    pub materials: Vec<MaterialRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SkippedUpload {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SpecificationResponse {
    pub file_name: String,
    pub markdown: String,
    pub images_total: usize,
    pub generated: usize,
    pub failed: usize,
    pub images: Vec<ImageStatus>,
    pub sections: Vec<SpecificationSection>,
    pub skipped: Vec<SkippedUpload>,
}

/// Parsed multipart form.
#[derive(Default)]
struct Upload {
    images: Vec<matspec_core::ImageInput>,
    skipped: Vec<SkippedUpload>,
    brief_text: String,
    brief_file: String,
    options: SectionOptions,
    consolidated: bool,
}

impl Upload {
    /// Brief file wins over typed text; both empty gives the placeholder.
    fn brief(&self) -> &str {
        [self.brief_file.trim(), self.brief_text.trim()]
            .into_iter()
            .find(|b| !b.is_empty())
            .unwrap_or(EMPTY_BRIEF)
    }
}

async fn create_specification(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SpecificationResponse>, ApiError> {
    let upload = read_upload(multipart, state.settings.pipeline.max_image_edge).await?;
    info!(
        images = upload.images.len(),
        skipped = upload.skipped.len(),
        consolidated = upload.consolidated,
        "specification request"
    );

    if upload.images.is_empty() {
        if upload.skipped.is_empty() {
            return Err(ApiError::BadRequest(
                "No images uploaded. Select one or more PNG or JPEG files and try again.".into(),
            ));
        }
        let names: Vec<&str> = upload.skipped.iter().map(|s| s.name.as_str()).collect();
        return Err(ApiError::NoValidImages(format!(
            "None of the uploaded files is a valid PNG or JPEG image ({}). Upload readable images and try again.",
            names.join(", ")
        )));
    }

    let options = PipelineOptions::from_settings(&state.settings, upload.options, upload.consolidated);
    let report = run_pipeline(
        state.provider.as_ref(),
        &upload.images,
        upload.brief(),
        &options,
        &state.policy,
        &NoProgress,
    )
    .await?;

    let images = report
        .analyses
        .iter()
        .map(|a| ImageStatus {
            name: a.image.clone(),
            status: if a.is_analyzed() { "analyzed" } else { "failed" },
            materials: a.materials().to_vec(),
            error: a.failure().map(|f| f.explain()),
        })
        .collect();

    let document = report.document;
    Ok(Json(SpecificationResponse {
        file_name: document.file_name(),
        markdown: document.render(),
        images_total: document.images_total,
        generated: document.generated_count(),
        failed: document.failed_count(),
        images,
        sections: document.sections,
        skipped: upload.skipped,
    }))
}

async fn read_upload(mut multipart: Multipart, max_edge: u32) -> Result<Upload, ApiError> {
    let mut upload = Upload::default();
    let mut names: Vec<String> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "images" => {
                let original = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("image-{}", names.len() + 1));
                let bytes = field.bytes().await.map_err(bad_form)?;
                let name = unique_name(&original, &names);
                names.push(name.clone());

                if !is_supported_image(Path::new(&name)) {
                    upload.skipped.push(SkippedUpload {
                        name,
                        reason: "not a .png, .jpg or .jpeg file".into(),
                    });
                    continue;
                }
                match encode_upload(name.clone(), bytes, max_edge).await {
                    Ok(image) => upload.images.push(image),
                    Err(reason) => {
                        warn!(name = %name, reason = %reason, "skipping upload");
                        upload.skipped.push(SkippedUpload { name, reason });
                    }
                }
            }
            "brief_text" => upload.brief_text = field.text().await.map_err(bad_form)?,
            "brief_file" => {
                let bytes = field.bytes().await.map_err(bad_form)?;
                upload.brief_file = String::from_utf8_lossy(&bytes).into_owned();
            }
            "sustainability" => {
                upload.options.sustainability = checked(&field.text().await.map_err(bad_form)?)
            }
            "alternatives" => {
                upload.options.alternatives = checked(&field.text().await.map_err(bad_form)?)
            }
            "consolidated" => upload.consolidated = checked(&field.text().await.map_err(bad_form)?),
            other => warn!(field = other, "ignoring unknown form field"),
        }
    }
    Ok(upload)
}

/// Decode and re-encode one upload on the blocking pool.
///
/// The error is the reason shown to the user for skipping the file.
async fn encode_upload(name: String, bytes: Bytes, max_edge: u32) -> Result<ImageInput, String> {
    let task = tokio::task::spawn_blocking(move || encode_image(&name, &bytes, max_edge));
    match task.await {
        Ok(Ok(image)) => Ok(image),
        Ok(Err(StoreError::Image { message, .. })) => Err(message),
        Ok(Err(other)) => Err(other.to_string()),
        Err(e) => Err(format!("image decoding stopped unexpectedly ({e})")),
    }
}

fn bad_form(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!(
        "Could not read the upload ({e}). Reload the page and submit the form again."
    ))
}

fn checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "yes"
    )
}

/// `name`, or `stem_2.ext`, `stem_3.ext`, ... when already taken.
fn unique_name(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    (2..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}
