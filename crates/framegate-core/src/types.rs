use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle of a queued frame.
///
/// Status only moves forward: `pending -> processing -> completed | failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FrameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStatus::Pending => "pending",
            FrameStatus::Processing => "processing",
            FrameStatus::Completed => "completed",
            FrameStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameStatus::Completed | FrameStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: FrameStatus) -> bool {
        matches!(
            (self, next),
            (FrameStatus::Pending, FrameStatus::Processing)
                | (FrameStatus::Processing, FrameStatus::Completed)
                | (FrameStatus::Processing, FrameStatus::Failed)
        )
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FrameStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FrameStatus::Pending),
            "processing" => Ok(FrameStatus::Processing),
            "completed" => Ok(FrameStatus::Completed),
            "failed" => Ok(FrameStatus::Failed),
            _ => Err(format!("Unknown frame status: {}", s)),
        }
    }
}

/// Lifecycle of a batch record.
///
/// `Queued` is accepted by storage and counted in stats, but the coordinator
/// creates batches directly in `Processing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BatchStatus::Queued),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            _ => Err(format!("Unknown batch status: {}", s)),
        }
    }
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Identifier of a monitored camera. Free-form, supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a queued frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub Uuid);

impl FrameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheEntryId(pub Uuid);

impl CacheEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CacheEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a persisted analysis result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(pub Uuid);

impl AnalysisId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnalysisId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Batch identifier of the form `batch_<unix-millis>_<9 base36 chars>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

impl BatchId {
    /// Build a fresh id from the given instant and a random suffix.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..9)
            .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
            .collect();
        Self(format!("batch_{}_{}", now.timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded SHA-256 fingerprint of a frame payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// A frame admitted to the intake queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub camera_id: CameraId,
    /// Raw image bytes. Not serialized into API responses.
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub content_hash: ContentHash,
    /// Higher is processed sooner.
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    pub status: FrameStatus,
    pub batch_id: Option<BatchId>,
    /// When the frame left the pending pool.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Set together with the `completed` status.
    pub analysis_ref: Option<AnalysisId>,
}

/// A cached analysis reference for one (camera, content hash) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: CacheEntryId,
    pub camera_id: CameraId,
    pub content_hash: ContentHash,
    pub analysis_ref: AnalysisId,
    pub inserted_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// Per-frame outcome recorded on a completed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub content_hash: ContentHash,
    pub analysis_ref: AnalysisId,
    pub issue_count: usize,
}

/// A group of frames drained and analyzed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub camera_id: CameraId,
    pub frame_ids: Vec<FrameId>,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Vec<BatchItemResult>,
}

/// Output of the analysis capability for a single payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub analysis_text: String,
    pub detected_issues: Vec<String>,
}

/// A persisted analysis result, referenced by cache entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub camera_id: CameraId,
    pub analysis_text: String,
    pub detected_issues: Vec<String>,
    pub requires_action: bool,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    /// Build a fresh record. Any detected issue marks it as requiring action.
    pub fn from_output(camera_id: &CameraId, output: AnalysisOutput, now: DateTime<Utc>) -> Self {
        Self {
            id: AnalysisId::new(),
            camera_id: camera_id.clone(),
            requires_action: !output.detected_issues.is_empty(),
            analysis_text: output.analysis_text,
            detected_issues: output.detected_issues,
            created_at: now,
        }
    }
}
