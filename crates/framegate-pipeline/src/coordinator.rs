//! Batch coordinator.
//!
//! Drains a bounded slice of one camera's queue and runs each frame through
//! the analyzer in turn:
//! New -> Draining -> ProcessingItems -> Finalizing -> Complete
//!
//! Item failures are recorded on the frame and never abort the batch. Only
//! failing to create or finalize the batch record is returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use framegate_core::clock::Clock;
use framegate_core::error::FramegateError;
use framegate_core::types::{
    Batch, BatchId, BatchItemResult, BatchStatus, CameraId, Frame, FrameStatus,
};
use framegate_storage::{BatchRepository, FrameQueueRepository};

use crate::analyzer::{AnalysisError, VisionAnalyzer};
use crate::guard::CameraGuards;

/// Phases of a single batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    New,
    Draining,
    ProcessingItems,
    Finalizing,
    Complete,
}

impl BatchPhase {
    /// Move to `next` if the transition is legal. An empty drain goes
    /// straight from Draining to Complete.
    pub fn advance(self, next: BatchPhase) -> Result<BatchPhase, FramegateError> {
        let valid = matches!(
            (self, next),
            (BatchPhase::New, BatchPhase::Draining)
                | (BatchPhase::Draining, BatchPhase::ProcessingItems)
                | (BatchPhase::Draining, BatchPhase::Complete)
                | (BatchPhase::ProcessingItems, BatchPhase::Finalizing)
                | (BatchPhase::Finalizing, BatchPhase::Complete)
        );
        if valid {
            Ok(next)
        } else {
            Err(FramegateError::InvalidInput(format!(
                "Invalid batch phase transition: {:?} -> {:?}",
                self, next
            )))
        }
    }
}

/// Counts for a batch that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub processed: usize,
    pub failed: usize,
}

/// What a `process_batch` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Processed(BatchSummary),
    NoPendingFrames,
    /// Another run holds this camera's single-flight permit.
    AlreadyRunning,
}

impl BatchOutcome {
    pub fn message(&self) -> String {
        match self {
            BatchOutcome::Processed(s) => format!(
                "Batch {} processed {} frame(s), {} failed",
                s.batch_id, s.processed, s.failed
            ),
            BatchOutcome::NoPendingFrames => "No pending frames to process".to_string(),
            BatchOutcome::AlreadyRunning => "batch already in progress".to_string(),
        }
    }
}

pub struct BatchCoordinator {
    queue: Arc<FrameQueueRepository>,
    batches: Arc<BatchRepository>,
    analyzer: Arc<dyn VisionAnalyzer>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    analysis_timeout: Duration,
    guards: Option<CameraGuards>,
}

impl BatchCoordinator {
    pub fn new(
        queue: Arc<FrameQueueRepository>,
        batches: Arc<BatchRepository>,
        analyzer: Arc<dyn VisionAnalyzer>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            batches,
            analyzer,
            clock,
            batch_size,
            analysis_timeout,
            guards: None,
        }
    }

    /// Allow at most one concurrent run per camera.
    pub fn with_single_flight(mut self) -> Self {
        self.guards = Some(CameraGuards::new());
        self
    }

    /// Drain and analyze up to `batch_size` pending frames for a camera.
    pub async fn process_batch(&self, camera_id: &CameraId) -> Result<BatchOutcome, FramegateError> {
        // Before anything is claimed, so a missing credential changes nothing.
        self.analyzer.ensure_ready()?;

        let _permit = match &self.guards {
            Some(guards) => match guards.try_acquire(camera_id) {
                Some(permit) => Some(permit),
                None => {
                    debug!(camera_id = %camera_id, "Batch already running, skipping");
                    return Ok(BatchOutcome::AlreadyRunning);
                }
            },
            None => None,
        };

        let mut phase = BatchPhase::New.advance(BatchPhase::Draining)?;

        let started_at = self.clock.now();
        let batch_id = BatchId::generate(started_at);
        let frames = self
            .queue
            .dequeue_batch(camera_id, self.batch_size, &batch_id, started_at)?;

        if frames.is_empty() {
            phase.advance(BatchPhase::Complete)?;
            return Ok(BatchOutcome::NoPendingFrames);
        }

        self.batches.create(&Batch {
            id: batch_id.clone(),
            camera_id: camera_id.clone(),
            frame_ids: frames.iter().map(|f| f.id).collect(),
            status: BatchStatus::Processing,
            started_at,
            completed_at: None,
            results: Vec::new(),
        })?;
        phase = phase.advance(BatchPhase::ProcessingItems)?;

        info!(
            batch_id = %batch_id,
            camera_id = %camera_id,
            frames = frames.len(),
            "Batch started"
        );

        let mut results = Vec::with_capacity(frames.len());
        for frame in &frames {
            match self.process_item(frame).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(
                        batch_id = %batch_id,
                        frame_id = %frame.id,
                        error = %e,
                        "Frame analysis failed"
                    );
                    if let Err(e) = self.queue.update_status(frame.id, FrameStatus::Failed) {
                        warn!(frame_id = %frame.id, error = %e, "Failed to mark frame failed");
                    }
                }
            }
        }

        phase = phase.advance(BatchPhase::Finalizing)?;
        self.batches.complete(&batch_id, &results, self.clock.now())?;
        phase.advance(BatchPhase::Complete)?;

        let summary = BatchSummary {
            batch_id,
            processed: results.len(),
            failed: frames.len() - results.len(),
        };
        info!(
            batch_id = %summary.batch_id,
            camera_id = %camera_id,
            processed = summary.processed,
            failed = summary.failed,
            "Batch completed"
        );

        Ok(BatchOutcome::Processed(summary))
    }

    /// Analyze one claimed frame, then persist, cache and complete it in a
    /// single transaction.
    async fn process_item(&self, frame: &Frame) -> Result<BatchItemResult, FramegateError> {
        let output = match tokio::time::timeout(
            self.analysis_timeout,
            self.analyzer.analyze(&frame.camera_id, &frame.payload),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(AnalysisError::Timeout(self.analysis_timeout.as_secs()).into()),
        };

        let now = self.clock.now();
        let analysis = self.queue.complete_with_analysis(frame, output, now)?;

        debug!(
            frame_id = %frame.id,
            analysis_id = %analysis.id,
            issues = analysis.detected_issues.len(),
            "Frame completed"
        );

        Ok(BatchItemResult {
            content_hash: frame.content_hash.clone(),
            analysis_ref: analysis.id,
            issue_count: analysis.detected_issues.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration};
    use framegate_core::clock::ManualClock;
    use framegate_core::hash::hash_payload;
    use framegate_storage::{CacheRepository, Database};

    use crate::analyzer::MockAnalyzer;

    struct Fixture {
        queue: Arc<FrameQueueRepository>,
        cache: Arc<CacheRepository>,
        batches: Arc<BatchRepository>,
        analyzer: Arc<MockAnalyzer>,
        coordinator: BatchCoordinator,
    }

    fn build(analyzer: MockAnalyzer, timeout: Duration, single_flight: bool) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let queue = Arc::new(FrameQueueRepository::new(db.clone()));
        let cache = Arc::new(CacheRepository::new(db.clone(), ChronoDuration::hours(24)));
        let batches = Arc::new(BatchRepository::new(db));
        let analyzer = Arc::new(analyzer);
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let mut coordinator = BatchCoordinator::new(
            queue.clone(),
            batches.clone(),
            analyzer.clone(),
            clock,
            5,
            timeout,
        );
        if single_flight {
            coordinator = coordinator.with_single_flight();
        }
        Fixture {
            queue,
            cache,
            batches,
            analyzer,
            coordinator,
        }
    }

    fn fixture_with(analyzer: MockAnalyzer, timeout: Duration) -> Fixture {
        build(analyzer, timeout, false)
    }

    fn fixture() -> Fixture {
        fixture_with(MockAnalyzer::new(), Duration::from_secs(60))
    }

    fn enqueue(f: &Fixture, cam: &CameraId, bytes: &[u8]) -> Frame {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        f.queue
            .enqueue(cam, bytes.to_vec(), hash_payload(bytes), 1, now)
            .unwrap()
    }

    #[test]
    fn test_phase_transitions() {
        let p = BatchPhase::New.advance(BatchPhase::Draining).unwrap();
        let p = p.advance(BatchPhase::ProcessingItems).unwrap();
        let p = p.advance(BatchPhase::Finalizing).unwrap();
        assert_eq!(p.advance(BatchPhase::Complete).unwrap(), BatchPhase::Complete);

        assert!(BatchPhase::Draining.advance(BatchPhase::Complete).is_ok());
        assert!(BatchPhase::New.advance(BatchPhase::Finalizing).is_err());
        assert!(BatchPhase::Complete.advance(BatchPhase::Draining).is_err());
        assert!(BatchPhase::ProcessingItems.advance(BatchPhase::Draining).is_err());
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let f = fixture();
        let outcome = f
            .coordinator
            .process_batch(&CameraId::new("cam-1"))
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::NoPendingFrames);
        assert_eq!(outcome.message(), "No pending frames to process");
        assert_eq!(f.analyzer.calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_completeness() {
        let f = fixture();
        let cam = CameraId::new("cam-1");
        let frames: Vec<Frame> = (0..3)
            .map(|i| enqueue(&f, &cam, format!("frame-{}", i).as_bytes()))
            .collect();

        let outcome = f.coordinator.process_batch(&cam).await.unwrap();
        let summary = match outcome {
            BatchOutcome::Processed(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 0);

        let batch = f.batches.get(&summary.batch_id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert!(batch.completed_at.is_some());
        assert_eq!(batch.frame_ids.len(), 3);
        assert_eq!(batch.results.len(), 3);

        for frame in &frames {
            let stored = f.queue.get(frame.id).unwrap().unwrap();
            assert!(stored.status.is_terminal());
            assert_eq!(stored.batch_id.as_ref(), Some(&summary.batch_id));
            assert!(f
                .cache
                .lookup(&cam, &frame.content_hash, stored.enqueued_at)
                .unwrap()
                .is_some());
        }
    }

    #[tokio::test]
    async fn test_drains_at_most_batch_size() {
        let f = fixture();
        let cam = CameraId::new("cam-1");
        for i in 0..7 {
            enqueue(&f, &cam, format!("frame-{}", i).as_bytes());
        }

        f.coordinator.process_batch(&cam).await.unwrap();
        assert_eq!(f.analyzer.calls(), 5);
        assert_eq!(f.queue.pending_count(&cam).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_continues() {
        let f = fixture();
        let cam = CameraId::new("cam-1");
        let good = enqueue(&f, &cam, b"good");
        let bad = enqueue(&f, &cam, b"bad");
        f.analyzer.fail_on(b"bad");

        let outcome = f.coordinator.process_batch(&cam).await.unwrap();
        let summary = match outcome {
            BatchOutcome::Processed(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);

        assert_eq!(f.queue.get(good.id).unwrap().unwrap().status, FrameStatus::Completed);
        assert_eq!(f.queue.get(bad.id).unwrap().unwrap().status, FrameStatus::Failed);
        assert!(f
            .cache
            .lookup(&cam, &bad.content_hash, bad.enqueued_at)
            .unwrap()
            .is_none());

        let batch = f.batches.get(&summary.batch_id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].content_hash, good.content_hash);
    }

    #[tokio::test]
    async fn test_missing_credentials_changes_nothing() {
        let f = fixture_with(MockAnalyzer::new().unconfigured(), Duration::from_secs(60));
        let cam = CameraId::new("cam-1");
        let frame = enqueue(&f, &cam, b"frame");

        let err = f.coordinator.process_batch(&cam).await.unwrap_err();
        assert!(matches!(err, FramegateError::Config(_)));
        assert_eq!(f.queue.get(frame.id).unwrap().unwrap().status, FrameStatus::Pending);
        assert_eq!(f.analyzer.calls(), 0);
    }

    #[tokio::test]
    async fn test_analysis_timeout_fails_item() {
        let f = fixture_with(
            MockAnalyzer::new().with_delay(Duration::from_millis(200)),
            Duration::from_millis(20),
        );
        let cam = CameraId::new("cam-1");
        let frame = enqueue(&f, &cam, b"slow");

        let outcome = f.coordinator.process_batch(&cam).await.unwrap();
        match outcome {
            BatchOutcome::Processed(s) => {
                assert_eq!(s.processed, 0);
                assert_eq!(s.failed, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(f.queue.get(frame.id).unwrap().unwrap().status, FrameStatus::Failed);
    }

    #[tokio::test]
    async fn test_frame_failed_during_analysis_is_not_cached() {
        let f = fixture_with(
            MockAnalyzer::new().with_delay(Duration::from_millis(200)),
            Duration::from_secs(5),
        );
        let cam = CameraId::new("cam-1");
        let frame = enqueue(&f, &cam, b"reaped mid-flight");

        // The reaper fails the claimed frame while the analyzer is still busy.
        let (outcome, reaped) = tokio::join!(f.coordinator.process_batch(&cam), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.queue.update_status(frame.id, FrameStatus::Failed)
        });
        reaped.unwrap();

        let summary = match outcome.unwrap() {
            BatchOutcome::Processed(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed, 1);

        let stored = f.queue.get(frame.id).unwrap().unwrap();
        assert_eq!(stored.status, FrameStatus::Failed);
        assert!(stored.analysis_ref.is_none());
        assert!(f
            .cache
            .lookup(&cam, &frame.content_hash, frame.enqueued_at)
            .unwrap()
            .is_none());
        assert!(f.batches.get(&summary.batch_id).unwrap().unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_refuses_overlap() {
        let f = build(
            MockAnalyzer::new().with_delay(Duration::from_millis(100)),
            Duration::from_secs(5),
            true,
        );
        let cam = CameraId::new("cam-1");
        enqueue(&f, &cam, b"one");
        enqueue(&f, &cam, b"two");

        let (first, second) = tokio::join!(
            f.coordinator.process_batch(&cam),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.coordinator.process_batch(&cam).await
            }
        );

        assert!(matches!(first.unwrap(), BatchOutcome::Processed(_)));
        let second = second.unwrap();
        assert_eq!(second, BatchOutcome::AlreadyRunning);
        assert_eq!(second.message(), "batch already in progress");
    }

    #[tokio::test]
    async fn test_overlap_without_guard_never_shares_frames() {
        let f = fixture_with(
            MockAnalyzer::new().with_delay(Duration::from_millis(50)),
            Duration::from_secs(5),
        );
        let cam = CameraId::new("cam-1");
        for i in 0..7 {
            enqueue(&f, &cam, format!("frame-{}", i).as_bytes());
        }

        let (a, b) = tokio::join!(
            f.coordinator.process_batch(&cam),
            f.coordinator.process_batch(&cam)
        );
        let total: usize = [a.unwrap(), b.unwrap()]
            .iter()
            .map(|o| match o {
                BatchOutcome::Processed(s) => s.processed + s.failed,
                _ => 0,
            })
            .sum();
        assert_eq!(total, 7);
        assert_eq!(f.analyzer.calls(), 7);
    }
}
