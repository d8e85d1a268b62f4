//! HTTP request handlers for the analysis API.
//!
//! # Endpoints
//!
//! - `POST /api/analyze` - Queue an analysis
//! - `GET /api/jobs` - List jobs
//! - `GET /api/jobs/{job_id}` - Job status and report
//! - `GET /health` - Health check endpoint

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::AnalysisConfig;
use crate::pipeline::AnalyzeRequest;

use super::jobs::{Job, JobQueue};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobQueue>,

    /// Directory that request paths are resolved under
    pub data_root: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        defaults: AnalysisConfig,
        max_concurrent: usize,
        data_root: impl Into<PathBuf>,
    ) -> Self {
        Self::with_queue(JobQueue::new(defaults, max_concurrent), data_root)
    }

    pub fn with_queue(queue: JobQueue, data_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs: Arc::new(queue),
            data_root: Arc::new(data_root.into()),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response of the job list endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors returned by the API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Path must be relative to the data directory: {0}")]
    ForbiddenPath(String),

    #[error("Job not found: {0}")]
    JobNotFound(u64),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::ForbiddenPath(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::JobNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        };
        let message = self.to_string();

        if status == StatusCode::NOT_FOUND {
            debug!(error_type, status = status.as_u16(), "Resource not found: {}", message);
        } else if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", message);
        } else {
            warn!(error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle health check requests.
///
/// `GET /health` returns `{"status": "healthy", "version": "..."}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Queue an analysis.
///
/// # Endpoint
///
/// `POST /api/analyze`
///
/// # Body
///
/// ```json
/// {
///   "predictions": "slide-1/predictions.csv",
///   "slide": "slide-1.svs",
///   "mpp": 0.25,
///   "magnification": 40,
///   "config": { "hotspot": { "diameter_mm": 2.0 } }
/// }
/// ```
///
/// Either `slide` or `mpp` must be present. `predictions` and `slide` are
/// relative to the server's data directory; the denoised table is never
/// written on behalf of a client.
///
/// # Response
///
/// - `202 Accepted` with the queued job
/// - `400 Bad Request` when the request is incomplete
/// - `403 Forbidden` for absolute paths or paths leaving the data directory
pub async fn analyze_handler(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    request.validate().map_err(ApiError::InvalidRequest)?;
    let request = request
        .confine_to(&state.data_root)
        .map_err(|path| ApiError::ForbiddenPath(path.display().to_string()))?;
    let job = state.jobs.submit(request).await;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// `GET /api/jobs`
pub async fn jobs_handler(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.jobs.list().await,
    })
}

/// `GET /api/jobs/{job_id}`; `404` for unknown or forgotten jobs.
pub async fn job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<u64>,
) -> Result<Json<Job>, ApiError> {
    state
        .jobs
        .get(job_id)
        .await
        .map(Json)
        .ok_or(ApiError::JobNotFound(job_id))
}
