//! Periodic expiry and cleanup.
//!
//! `cleanup_old_data` deletes expired cache entries and old completed
//! frames. It never touches pending or processing rows. Frames stuck in
//! processing are handled separately by `reap_stuck_frames`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use framegate_core::config::{CacheConfig, JanitorConfig};
use framegate_core::error::FramegateError;

use crate::batches::completed_results_in;
use crate::db::{storage_err, to_millis, Database};

/// Result of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub deleted_cache_entries: u64,
    pub deleted_frames: u64,
}

/// Result of a reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapResult {
    /// Frames moved from processing to failed.
    pub reaped_frames: u64,
    /// Batches left processing past the timeout and closed out.
    pub closed_batches: u64,
}

pub struct Janitor {
    db: Arc<Database>,
    cache_ttl: Duration,
    completed_retention: Duration,
    processing_timeout: Duration,
}

impl Janitor {
    pub fn new(db: Arc<Database>, cache: &CacheConfig, janitor: &JanitorConfig) -> Self {
        Self {
            db,
            cache_ttl: cache.ttl(),
            completed_retention: janitor.completed_frame_retention(),
            processing_timeout: janitor.processing_timeout(),
        }
    }

    /// Delete cache entries older than the TTL and completed frames older
    /// than the retention window.
    pub fn cleanup_old_data(&self, now: DateTime<Utc>) -> Result<CleanupResult, FramegateError> {
        let cache_cutoff = to_millis(now - self.cache_ttl);
        let frame_cutoff = to_millis(now - self.completed_retention);

        let deleted_cache_entries = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM frame_cache WHERE inserted_at < ?1",
                rusqlite::params![cache_cutoff],
            )
            .map_err(|e| FramegateError::Storage(format!("Cache cleanup failed: {}", e)))
        })?;

        let deleted_frames = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM frame_queue WHERE status = 'completed' AND enqueued_at < ?1",
                rusqlite::params![frame_cutoff],
            )
            .map_err(|e| FramegateError::Storage(format!("Frame cleanup failed: {}", e)))
        })?;

        let result = CleanupResult {
            deleted_cache_entries: deleted_cache_entries as u64,
            deleted_frames: deleted_frames as u64,
        };

        info!(
            deleted_cache_entries = result.deleted_cache_entries,
            deleted_frames = result.deleted_frames,
            "Cleanup cycle completed"
        );

        Ok(result)
    }

    /// Fail frames that have sat in processing longer than the timeout.
    pub fn reap_stuck_frames(&self, now: DateTime<Utc>) -> Result<ReapResult, FramegateError> {
        let cutoff = to_millis(now - self.processing_timeout);

        let (reaped, closed) = self.db.with_tx(|tx| {
            let reaped = tx
                .execute(
                    "UPDATE frame_queue SET status = 'failed'
                     WHERE status = 'processing' AND claimed_at IS NOT NULL AND claimed_at < ?1",
                    rusqlite::params![cutoff],
                )
                .map_err(|e| FramegateError::Storage(format!("Reap frames failed: {}", e)))?;

            let stale: Vec<String> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT id FROM batches
                         WHERE status = 'processing' AND started_at < ?1
                         AND NOT EXISTS (
                             SELECT 1 FROM frame_queue
                             WHERE frame_queue.batch_id = batches.id
                             AND frame_queue.status IN ('pending', 'processing')
                         )",
                    )
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(rusqlite::params![cutoff], |row| row.get(0))
                    .map_err(storage_err)?;
                let ids = rows
                    .collect::<Result<Vec<String>, _>>()
                    .map_err(storage_err)?;
                ids
            };

            // Frames that did complete before the batch stalled keep their results.
            for batch_id in &stale {
                let results = serde_json::to_string(&completed_results_in(tx, batch_id)?)?;
                tx.execute(
                    "UPDATE batches SET status = 'completed', completed_at = ?1, results = ?2
                     WHERE id = ?3",
                    rusqlite::params![to_millis(now), results, batch_id],
                )
                .map_err(|e| FramegateError::Storage(format!("Reap batches failed: {}", e)))?;
            }

            Ok((reaped, stale.len()))
        })?;

        let result = ReapResult {
            reaped_frames: reaped as u64,
            closed_batches: closed as u64,
        };

        if result.reaped_frames > 0 || result.closed_batches > 0 {
            info!(
                reaped_frames = result.reaped_frames,
                closed_batches = result.closed_batches,
                "Reaped stuck processing work"
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegate_core::hash::hash_payload;
    use framegate_core::types::{
        AnalysisId, AnalysisOutput, Batch, BatchId, BatchItemResult, BatchStatus, CameraId,
        FrameStatus,
    };

    use crate::{BatchRepository, CacheRepository, FrameQueueRepository};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn make_janitor(db: Arc<Database>) -> Janitor {
        Janitor::new(db, &CacheConfig::default(), &JanitorConfig::default())
    }

    #[test]
    fn test_cleanup_deletes_only_expired_cache_entries() {
        let db = Arc::new(Database::in_memory().unwrap());
        let cache = CacheRepository::new(db.clone(), Duration::hours(24));
        let cam = CameraId::new("cam-1");

        let old = t0() - Duration::hours(30);
        cache
            .insert(&cam, &hash_payload(b"old-1"), AnalysisId::new(), old)
            .unwrap();
        cache
            .insert(&cam, &hash_payload(b"old-2"), AnalysisId::new(), old)
            .unwrap();
        let fresh_hash = hash_payload(b"fresh");
        let fresh = cache
            .insert(&cam, &fresh_hash, AnalysisId::new(), t0() - Duration::hours(1))
            .unwrap();

        let result = make_janitor(db).cleanup_old_data(t0()).unwrap();
        assert_eq!(result.deleted_cache_entries, 2);
        assert_eq!(result.deleted_frames, 0);

        let found = cache.lookup(&cam, &fresh_hash, t0()).unwrap().unwrap();
        assert_eq!(found.id, fresh.id);
        assert_eq!(cache.count().unwrap(), 1);
    }

    #[test]
    fn test_cleanup_deletes_only_old_completed_frames() {
        let db = Arc::new(Database::in_memory().unwrap());
        let queue = FrameQueueRepository::new(db.clone());
        let cam = CameraId::new("cam-1");
        let old = t0() - Duration::hours(2);

        let mut ids = Vec::new();
        for i in 0..4 {
            let bytes = format!("old-{}", i).into_bytes();
            let hash = hash_payload(&bytes);
            ids.push(queue.enqueue(&cam, bytes, hash, 1, old).unwrap().id);
        }
        let recent = queue
            .enqueue(&cam, b"recent".to_vec(), hash_payload(b"recent"), 0, t0())
            .unwrap();

        // ids[0] completed, ids[1] failed, ids[2] processing, ids[3] pending.
        let batch = BatchId::generate(t0());
        queue.dequeue_batch(&cam, 3, &batch, old).unwrap();
        queue.update_status(ids[0], FrameStatus::Completed).unwrap();
        queue.update_status(ids[1], FrameStatus::Failed).unwrap();

        let result = make_janitor(db).cleanup_old_data(t0()).unwrap();
        assert_eq!(result.deleted_frames, 1);
        assert!(queue.get(ids[0]).unwrap().is_none());
        assert!(queue.get(ids[1]).unwrap().is_some());
        assert!(queue.get(ids[2]).unwrap().is_some());
        assert!(queue.get(ids[3]).unwrap().is_some());
        assert!(queue.get(recent.id).unwrap().is_some());
    }

    #[test]
    fn test_reap_stuck_frames() {
        let db = Arc::new(Database::in_memory().unwrap());
        let queue = FrameQueueRepository::new(db.clone());
        let batches = BatchRepository::new(db.clone());
        let cam = CameraId::new("cam-1");

        let done = queue
            .enqueue(&cam, b"done".to_vec(), hash_payload(b"done"), 9, t0())
            .unwrap();
        let stuck = queue
            .enqueue(&cam, b"stuck".to_vec(), hash_payload(b"stuck"), 5, t0())
            .unwrap();
        let waiting = queue
            .enqueue(&cam, b"waiting".to_vec(), hash_payload(b"waiting"), 1, t0())
            .unwrap();

        let claimed_at = t0() - Duration::minutes(45);
        let batch_id = BatchId::generate(claimed_at);
        let claimed = queue.dequeue_batch(&cam, 2, &batch_id, claimed_at).unwrap();
        let analysis = queue
            .complete_with_analysis(
                &claimed[0],
                AnalysisOutput {
                    analysis_text: "Missing guard".to_string(),
                    detected_issues: vec!["Missing guard".to_string()],
                },
                claimed_at,
            )
            .unwrap();
        batches
            .create(&Batch {
                id: batch_id.clone(),
                camera_id: cam.clone(),
                frame_ids: vec![done.id, stuck.id],
                status: BatchStatus::Processing,
                started_at: claimed_at,
                completed_at: None,
                results: Vec::new(),
            })
            .unwrap();

        let janitor = make_janitor(db);
        let result = janitor.reap_stuck_frames(t0()).unwrap();
        assert_eq!(result.reaped_frames, 1);
        assert_eq!(result.closed_batches, 1);

        assert_eq!(queue.get(stuck.id).unwrap().unwrap().status, FrameStatus::Failed);
        assert_eq!(
            queue.get(waiting.id).unwrap().unwrap().status,
            FrameStatus::Pending
        );
        let closed = batches.get(&batch_id).unwrap().unwrap();
        assert_eq!(closed.status, BatchStatus::Completed);
        assert_eq!(closed.completed_at, Some(t0()));
        assert_eq!(
            closed.results,
            vec![BatchItemResult {
                content_hash: done.content_hash.clone(),
                analysis_ref: analysis.id,
                issue_count: 1,
            }]
        );

        // Second pass finds nothing.
        assert_eq!(janitor.reap_stuck_frames(t0()).unwrap(), ReapResult::default());
    }

    #[test]
    fn test_reap_leaves_recent_processing_frames() {
        let db = Arc::new(Database::in_memory().unwrap());
        let queue = FrameQueueRepository::new(db.clone());
        let cam = CameraId::new("cam-1");
        let frame = queue
            .enqueue(&cam, b"busy".to_vec(), hash_payload(b"busy"), 1, t0())
            .unwrap();
        queue
            .dequeue_batch(&cam, 1, &BatchId::generate(t0()), t0() - Duration::minutes(10))
            .unwrap();

        let result = make_janitor(db).reap_stuck_frames(t0()).unwrap();
        assert_eq!(result.reaped_frames, 0);
        assert_eq!(
            queue.get(frame.id).unwrap().unwrap().status,
            FrameStatus::Processing
        );
    }
}
