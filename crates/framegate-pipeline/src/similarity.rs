//! Near-duplicate detection against a camera's recent completed frames.
//!
//! This is a positional comparison of hex digests, not perceptual
//! similarity: the same scene re-encoded to different bytes will not match.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use framegate_core::config::SimilarityConfig;
use framegate_core::error::FramegateError;
use framegate_core::types::{CameraId, ContentHash};
use framegate_storage::FrameQueueRepository;

/// Fraction of positions where `a` and `b` hold the same character,
/// measured over the shorter of the two. Identical strings score 1.0.
pub fn positional_match_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let matches = a
        .bytes()
        .zip(b.bytes())
        .take(len)
        .filter(|(x, y)| x == y)
        .count();
    matches as f64 / len as f64
}

/// Whether `candidate` scores strictly above `threshold` against any hash
/// in `history`.
pub fn exceeds_threshold(candidate: &ContentHash, history: &[ContentHash], threshold: f64) -> bool {
    history
        .iter()
        .any(|h| positional_match_ratio(h.as_str(), candidate.as_str()) > threshold)
}

pub struct SimilarityFilter {
    queue: Arc<FrameQueueRepository>,
    threshold: f64,
    window: Duration,
    history_limit: usize,
}

impl SimilarityFilter {
    pub fn new(queue: Arc<FrameQueueRepository>, config: &SimilarityConfig) -> Self {
        Self {
            queue,
            threshold: config.threshold,
            window: config.window(),
            history_limit: config.history_limit as usize,
        }
    }

    /// Compare `hash` with the camera's recent completed frames.
    pub fn is_near_duplicate(
        &self,
        camera_id: &CameraId,
        hash: &ContentHash,
        now: DateTime<Utc>,
    ) -> Result<bool, FramegateError> {
        let history =
            self.queue
                .recent_completed_hashes(camera_id, now - self.window, self.history_limit)?;
        Ok(exceeds_threshold(hash, &history, self.threshold))
    }
}
