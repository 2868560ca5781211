//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path parameters or a JSON body via axum
//! extractors, calls into the frame processor, and returns JSON.

use axum::extract::{Path, State};
use axum::Json;
use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use framegate_core::types::{Analysis, AnalysisId, Batch, BatchId, CameraId, Frame, FrameId};
use framegate_pipeline::{BatchOutcome, SubmitOutcome};
use framegate_storage::{CleanupResult, PipelineStats, ReapResult};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitFrameRequest {
    pub camera_id: String,
    /// Base64 image bytes, optionally as a `data:` URL.
    pub frame_data: String,
    pub priority: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessBatchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
    pub message: String,
}

impl From<BatchOutcome> for ProcessBatchResponse {
    fn from(outcome: BatchOutcome) -> Self {
        let message = outcome.message();
        match outcome {
            BatchOutcome::Processed(summary) => Self {
                batch_id: Some(summary.batch_id.0),
                processed: Some(summary.processed),
                failed: Some(summary.failed),
                message,
            },
            BatchOutcome::NoPendingFrames | BatchOutcome::AlreadyRunning => Self {
                batch_id: None,
                processed: None,
                failed: None,
                message,
            },
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode a base64 frame, accepting a `data:<mime>;base64,` prefix.
fn decode_frame_data(data: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("frame_data is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("frame_data is empty".to_string()));
    }
    Ok(bytes)
}

fn parse_uuid(kind: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {} id: {}", kind, raw)))
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /frames
pub async fn submit_frame(
    State(state): State<AppState>,
    Json(req): Json<SubmitFrameRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let payload = decode_frame_data(&req.frame_data)?;
    let outcome = state
        .processor
        .submit_frame(&CameraId::new(req.camera_id), payload, req.priority)
        .await?;
    Ok(Json(outcome))
}

/// GET /frames/{id}
pub async fn get_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Frame>, ApiError> {
    let id = FrameId(parse_uuid("frame", &id)?);
    Ok(Json(state.processor.get_frame(id)?))
}

/// POST /cameras/{camera_id}/batches
pub async fn process_batch(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Json<ProcessBatchResponse>, ApiError> {
    let outcome = state
        .processor
        .process_batch(&CameraId::new(camera_id))
        .await?;
    Ok(Json(outcome.into()))
}

/// GET /batches/{batch_id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<Batch>, ApiError> {
    Ok(Json(state.processor.get_batch(&BatchId(batch_id))?))
}

/// GET /analyses/{id}
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Analysis>, ApiError> {
    let id = AnalysisId(parse_uuid("analysis", &id)?);
    Ok(Json(state.processor.get_analysis(id)?))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<PipelineStats>, ApiError> {
    Ok(Json(state.processor.cache_stats()?))
}

/// POST /maintenance/cleanup
pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResult>, ApiError> {
    Ok(Json(state.processor.cleanup_old_data()?))
}

/// POST /maintenance/reap
pub async fn reap(State(state): State<AppState>) -> Result<Json<ReapResult>, ApiError> {
    Ok(Json(state.processor.reap_stuck_frames()?))
}
