//! Batch records.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use framegate_core::error::FramegateError;
use framegate_core::types::{
    AnalysisId, Batch, BatchId, BatchItemResult, BatchStatus, CameraId, ContentHash, FrameId,
};

use crate::db::{from_millis, parse_uuid, storage_err, to_millis, Database, OptionalExt};

/// Repository for batch records.
pub struct BatchRepository {
    db: Arc<Database>,
}

impl BatchRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new batch. The frame id list is fixed from here on.
    pub fn create(&self, batch: &Batch) -> Result<(), FramegateError> {
        let frame_ids = serde_json::to_string(&batch.frame_ids)?;
        let results = serde_json::to_string(&batch.results)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO batches (id, camera_id, frame_ids, status, started_at, completed_at, results)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    batch.id.as_str(),
                    batch.camera_id.as_str(),
                    frame_ids,
                    batch.status.as_str(),
                    to_millis(batch.started_at),
                    batch.completed_at.map(to_millis),
                    results,
                ],
            )
            .map_err(|e| FramegateError::Storage(format!("Failed to create batch: {}", e)))?;
            Ok(())
        })
    }

    /// Mark a batch completed and attach its per-item results.
    ///
    /// A batch completes exactly once; a second call is rejected.
    pub fn complete(
        &self,
        batch_id: &BatchId,
        results: &[BatchItemResult],
        now: DateTime<Utc>,
    ) -> Result<(), FramegateError> {
        let results = serde_json::to_string(results)?;

        self.db.with_tx(|tx| {
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM batches WHERE id = ?1",
                    rusqlite::params![batch_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            match status.as_deref() {
                None => return Err(FramegateError::not_found("batch", batch_id.as_str())),
                Some("completed") => {
                    return Err(FramegateError::InvalidInput(format!(
                        "Batch {} is already completed",
                        batch_id
                    )))
                }
                Some(_) => {}
            }

            tx.execute(
                "UPDATE batches SET status = 'completed', completed_at = ?1, results = ?2
                 WHERE id = ?3",
                rusqlite::params![to_millis(now), results, batch_id.as_str()],
            )
            .map_err(|e| FramegateError::Storage(format!("Failed to complete batch: {}", e)))?;
            Ok(())
        })
    }

    pub fn get(&self, batch_id: &BatchId) -> Result<Option<Batch>, FramegateError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, camera_id, frame_ids, status, started_at, completed_at, results
                     FROM batches WHERE id = ?1",
                )
                .map_err(storage_err)?;

            let result = stmt
                .query_row(rusqlite::params![batch_id.as_str()], |row| {
                    Ok(row_to_batch(row))
                })
                .optional()
                .map_err(storage_err)?;

            match result {
                Some(batch) => Ok(Some(batch?)),
                None => Ok(None),
            }
        })
    }
}

/// Results for a batch's completed frames, in drain order. Used when a
/// batch is closed by the reaper rather than by its coordinator.
pub(crate) fn completed_results_in(
    conn: &rusqlite::Connection,
    batch_id: &str,
) -> Result<Vec<BatchItemResult>, FramegateError> {
    let mut stmt = conn
        .prepare(
            "SELECT f.content_hash, f.analysis_ref, a.detected_issues
             FROM frame_queue f JOIN analyses a ON a.id = f.analysis_ref
             WHERE f.batch_id = ?1 AND f.status = 'completed'
             ORDER BY f.priority DESC, f.enqueued_at ASC, f.seq ASC",
        )
        .map_err(storage_err)?;
    let rows = stmt
        .query_map(rusqlite::params![batch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(storage_err)?;

    let mut results = Vec::new();
    for row in rows {
        let (hash, analysis_ref, issues) = row.map_err(storage_err)?;
        let issues: Vec<String> = serde_json::from_str(&issues)?;
        results.push(BatchItemResult {
            content_hash: ContentHash(hash),
            analysis_ref: AnalysisId(parse_uuid(&analysis_ref)?),
            issue_count: issues.len(),
        });
    }
    Ok(results)
}

fn row_to_batch(row: &rusqlite::Row) -> Result<Batch, FramegateError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let camera_id: String = row.get(1).map_err(storage_err)?;
    let frame_ids: String = row.get(2).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let started_at: i64 = row.get(4).map_err(storage_err)?;
    let completed_at: Option<i64> = row.get(5).map_err(storage_err)?;
    let results: String = row.get(6).map_err(storage_err)?;

    let frame_ids: Vec<FrameId> = serde_json::from_str(&frame_ids)?;
    let results: Vec<BatchItemResult> = serde_json::from_str(&results)?;
    let status: BatchStatus = status.parse().map_err(FramegateError::Storage)?;

    Ok(Batch {
        id: BatchId(id),
        camera_id: CameraId(camera_id),
        frame_ids,
        status,
        started_at: from_millis(started_at)?,
        completed_at: completed_at.map(from_millis).transpose()?,
        results,
    })
}
