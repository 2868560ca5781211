//! Frame intake.
//!
//! `submit_frame` is the whole admission path: hash, cache lookup,
//! similarity check, enqueue, and a batch run once the camera's pending
//! count reaches the trigger threshold. The batch runs inside the
//! submitting call; there is no background worker.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use framegate_core::clock::Clock;
use framegate_core::config::FramegateConfig;
use framegate_core::error::FramegateError;
use framegate_core::hash::hash_payload;
use framegate_core::types::{Analysis, AnalysisId, Batch, BatchId, CameraId, Frame, FrameId};
use framegate_storage::{
    AnalysisRepository, BatchRepository, CacheRepository, CleanupResult, Database,
    FrameQueueRepository, Janitor, PipelineStats, ReapResult, StatsReporter,
};

use crate::analyzer::VisionAnalyzer;
use crate::coordinator::{BatchCoordinator, BatchOutcome};
use crate::similarity::SimilarityFilter;

/// Result of one `submit_frame` call. Exactly one of `cached`, `skipped`
/// and `queued` is true.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub cached: bool,
    pub skipped: bool,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<FrameId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_ref: Option<AnalysisId>,
    /// Set when this submission triggered a batch that ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub message: String,
}

impl SubmitOutcome {
    fn cache_hit(analysis_ref: AnalysisId) -> Self {
        Self {
            cached: true,
            skipped: false,
            queued: false,
            queue_id: None,
            analysis_ref: Some(analysis_ref),
            batch_id: None,
            message: "Frame already analyzed (cache hit)".to_string(),
        }
    }

    fn similar() -> Self {
        Self {
            cached: false,
            skipped: true,
            queued: false,
            queue_id: None,
            analysis_ref: None,
            batch_id: None,
            message: "Frame too similar to recent frames (skipped)".to_string(),
        }
    }
}

/// Entry point for every pipeline operation.
pub struct FrameProcessor {
    cache: Arc<CacheRepository>,
    queue: Arc<FrameQueueRepository>,
    batches: Arc<BatchRepository>,
    analyses: Arc<AnalysisRepository>,
    similarity: SimilarityFilter,
    coordinator: BatchCoordinator,
    stats: StatsReporter,
    janitor: Janitor,
    clock: Arc<dyn Clock>,
    batch_size: u32,
    trigger_threshold: u64,
    default_priority: i64,
}

impl FrameProcessor {
    pub fn new(
        db: Arc<Database>,
        config: &FramegateConfig,
        analyzer: Arc<dyn VisionAnalyzer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(CacheRepository::new(db.clone(), config.cache.ttl()));
        let queue = Arc::new(
            FrameQueueRepository::new(db.clone())
                .with_pending_limit(config.queue.max_pending_per_camera),
        );
        let batches = Arc::new(BatchRepository::new(db.clone()));
        let analyses = Arc::new(AnalysisRepository::new(db.clone()));

        let mut coordinator = BatchCoordinator::new(
            queue.clone(),
            batches.clone(),
            analyzer,
            clock.clone(),
            config.queue.batch_size as usize,
            config.batch.analysis_timeout(),
        );
        if config.batch.single_flight {
            coordinator = coordinator.with_single_flight();
        }

        Self {
            similarity: SimilarityFilter::new(queue.clone(), &config.similarity),
            stats: StatsReporter::new(db.clone()),
            janitor: Janitor::new(db, &config.cache, &config.janitor),
            cache,
            queue,
            batches,
            analyses,
            coordinator,
            clock,
            batch_size: config.queue.batch_size,
            trigger_threshold: config.queue.trigger_threshold as u64,
            default_priority: config.queue.default_priority,
        }
    }

    /// Admit one frame.
    ///
    /// A live cache entry answers immediately and never reaches the
    /// analyzer. A near-duplicate of a recent completed frame is dropped
    /// without writing anything. Otherwise the frame is queued.
    pub async fn submit_frame(
        &self,
        camera_id: &CameraId,
        payload: Vec<u8>,
        priority: Option<i64>,
    ) -> Result<SubmitOutcome, FramegateError> {
        if camera_id.as_str().trim().is_empty() {
            return Err(FramegateError::InvalidInput(
                "camera_id must not be empty".to_string(),
            ));
        }
        if payload.is_empty() {
            return Err(FramegateError::InvalidInput(
                "frame payload must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let hash = hash_payload(&payload);

        if let Some(entry) = self.cache.lookup(camera_id, &hash, now)? {
            self.cache.record_hit(entry.id)?;
            debug!(camera_id = %camera_id, hash = %hash, "Cache hit");
            return Ok(SubmitOutcome::cache_hit(entry.analysis_ref));
        }

        if self.similarity.is_near_duplicate(camera_id, &hash, now)? {
            debug!(camera_id = %camera_id, hash = %hash, "Similar frame skipped");
            return Ok(SubmitOutcome::similar());
        }

        let priority = priority.unwrap_or(self.default_priority);
        let frame = self.queue.enqueue(camera_id, payload, hash, priority, now)?;
        let pending = self.queue.pending_count(camera_id)?;

        let mut outcome = SubmitOutcome {
            cached: false,
            skipped: false,
            queued: true,
            queue_id: Some(frame.id),
            analysis_ref: None,
            batch_id: None,
            message: format!("Frame queued ({}/{} in batch)", pending, self.batch_size),
        };

        if pending >= self.trigger_threshold {
            info!(camera_id = %camera_id, pending, "Pending threshold reached, running batch");
            match self.coordinator.process_batch(camera_id).await {
                Ok(BatchOutcome::Processed(summary)) => outcome.batch_id = Some(summary.batch_id),
                Ok(_) => {}
                // The frame is already durably queued; a later trigger picks it up.
                Err(e) => warn!(camera_id = %camera_id, error = %e, "Triggered batch failed"),
            }
        }

        Ok(outcome)
    }

    /// Run a batch for a camera on demand.
    pub async fn process_batch(&self, camera_id: &CameraId) -> Result<BatchOutcome, FramegateError> {
        self.coordinator.process_batch(camera_id).await
    }

    pub fn cache_stats(&self) -> Result<PipelineStats, FramegateError> {
        self.stats.collect()
    }

    pub fn cleanup_old_data(&self) -> Result<CleanupResult, FramegateError> {
        self.janitor.cleanup_old_data(self.clock.now())
    }

    pub fn reap_stuck_frames(&self) -> Result<ReapResult, FramegateError> {
        self.janitor.reap_stuck_frames(self.clock.now())
    }

    pub fn get_frame(&self, id: FrameId) -> Result<Frame, FramegateError> {
        self.queue
            .get(id)?
            .ok_or_else(|| FramegateError::not_found("frame", id.to_string()))
    }

    pub fn get_batch(&self, id: &BatchId) -> Result<Batch, FramegateError> {
        self.batches
            .get(id)?
            .ok_or_else(|| FramegateError::not_found("batch", id.as_str()))
    }

    pub fn get_analysis(&self, id: AnalysisId) -> Result<Analysis, FramegateError> {
        self.analyses
            .get(id)?
            .ok_or_else(|| FramegateError::not_found("analysis", id.to_string()))
    }
}
