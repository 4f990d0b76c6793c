//! HTTP routes.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use comfyui_mini_domain::{
    analyze, discover_inputs, EnrichedQueue, OutputFile, StorageArea, WorkflowGraph,
    WorkflowInput,
};
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::infrastructure::ports::BackendError;

/// Create all HTTP routes. Images are proxied under `/{proxy_prefix}/image`.
pub fn routes(proxy_prefix: &str) -> Router<Arc<App>> {
    let image_path = format!("/{}/image", proxy_prefix.trim_matches('/'));

    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/workflow/analyze", post(analyze_workflow))
        .route("/api/queue", get(get_queue))
        .route("/api/interrupt", post(interrupt))
        .route(&image_path, get(proxy_image))
}

async fn health() -> &'static str {
    "OK"
}

// =============================================================================
// Workflows
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowAnalysis {
    node_count: usize,
    max_depth: u32,
    average_depth: f64,
    has_dependencies: bool,
    inputs: Vec<WorkflowInput>,
}

async fn analyze_workflow(
    Json(workflow): Json<WorkflowGraph>,
) -> Result<Json<WorkflowAnalysis>, ApiError> {
    workflow
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let analysis = analyze(&workflow);
    Ok(Json(WorkflowAnalysis {
        node_count: workflow.len(),
        max_depth: analysis.max_depth,
        average_depth: analysis.average_depth(),
        has_dependencies: analysis.has_dependencies(),
        inputs: discover_inputs(&workflow),
    }))
}

// =============================================================================
// Queue
// =============================================================================

async fn get_queue(State(app): State<Arc<App>>) -> Result<Json<EnrichedQueue>, ApiError> {
    let queue = app.queue.poll().await?;
    Ok(Json(queue))
}

/// Ask the backend to stop the running prompt. The call is not awaited.
async fn interrupt(State(app): State<Arc<App>>) -> StatusCode {
    let backend = app.backend.clone();
    tokio::spawn(async move {
        match backend.interrupt().await {
            Ok(()) => tracing::info!("Interrupt sent to backend"),
            Err(e) => tracing::warn!(error = %e, "Failed to interrupt backend"),
        }
    });
    StatusCode::ACCEPTED
}

// =============================================================================
// Image proxy
// =============================================================================

#[derive(Debug, Deserialize)]
struct ImageQuery {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

async fn proxy_image(
    State(app): State<Arc<App>>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    if query.filename.is_empty() {
        return Err(ApiError::BadRequest("filename is required".to_string()));
    }
    let kind = match query.kind.as_deref() {
        None | Some("") => StorageArea::default(),
        Some(raw) => {
            StorageArea::from_str(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?
        }
    };

    let file = OutputFile::new(query.filename, query.subfolder, kind);
    let fetched = app.backend.view(&file).await?;
    let content_type = fetched
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(fetched.body),
    )
        .into_response())
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Backend request failed");
                (StatusCode::BAD_GATEWAY, "Backend request failed").into_response()
            }
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound
        } else {
            ApiError::Upstream(e.to_string())
        }
    }
}
