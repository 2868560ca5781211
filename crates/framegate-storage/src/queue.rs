//! Per-camera prioritized intake queue.
//!
//! Frames are rows in `frame_queue`. Draining is destructive: a dequeue
//! claims rows by moving them to `processing` inside the same transaction
//! that selected them, so two overlapping drains never share a frame.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use framegate_core::error::FramegateError;
use framegate_core::types::{
    Analysis, AnalysisId, AnalysisOutput, BatchId, CacheEntry, CacheEntryId, CameraId,
    ContentHash, Frame, FrameId, FrameStatus,
};

use crate::analyses::insert_analysis_in;
use crate::cache::insert_cache_entry_in;
use crate::db::{from_millis, parse_uuid, storage_err, to_millis, Database, OptionalExt};

const FRAME_COLUMNS: &str =
    "id, camera_id, payload, content_hash, priority, enqueued_at, status, batch_id, claimed_at, analysis_ref";

/// Repository for queued frames.
pub struct FrameQueueRepository {
    db: Arc<Database>,
    max_pending_per_camera: Option<u64>,
}

impl FrameQueueRepository {
    /// An unbounded queue.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            max_pending_per_camera: None,
        }
    }

    /// Reject new frames once a camera holds `limit` pending frames.
    pub fn with_pending_limit(mut self, limit: u64) -> Self {
        self.max_pending_per_camera = Some(limit);
        self
    }

    /// Admit a frame as `pending`.
    ///
    /// Fails with [`FramegateError::QueueFull`] when the camera is at its
    /// pending limit; the newest submission is the one rejected.
    pub fn enqueue(
        &self,
        camera_id: &CameraId,
        payload: Vec<u8>,
        hash: ContentHash,
        priority: i64,
        now: DateTime<Utc>,
    ) -> Result<Frame, FramegateError> {
        let frame = Frame {
            id: FrameId::new(),
            camera_id: camera_id.clone(),
            payload,
            content_hash: hash,
            priority,
            enqueued_at: now,
            status: FrameStatus::Pending,
            batch_id: None,
            claimed_at: None,
            analysis_ref: None,
        };

        self.db.with_tx(|tx| {
            if let Some(limit) = self.max_pending_per_camera {
                let pending = pending_count_in(tx, camera_id)?;
                if pending >= limit {
                    return Err(FramegateError::QueueFull {
                        camera_id: camera_id.to_string(),
                        limit,
                    });
                }
            }

            tx.execute(
                "INSERT INTO frame_queue (id, camera_id, payload, content_hash, priority, enqueued_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
                rusqlite::params![
                    frame.id.to_string(),
                    frame.camera_id.as_str(),
                    frame.payload,
                    frame.content_hash.as_str(),
                    frame.priority,
                    to_millis(frame.enqueued_at),
                ],
            )
            .map_err(|e| FramegateError::Storage(format!("Failed to enqueue frame: {}", e)))?;
            Ok(())
        })?;

        debug!(frame_id = %frame.id, camera_id = %camera_id, priority, "Frame enqueued");
        Ok(frame)
    }

    /// Claim up to `limit` pending frames for `batch_id`.
    ///
    /// Order is priority descending, then enqueue time ascending, then
    /// insertion order. Claimed frames come back already `processing`.
    pub fn dequeue_batch(
        &self,
        camera_id: &CameraId,
        limit: usize,
        batch_id: &BatchId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Frame>, FramegateError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.db.with_tx(|tx| {
            let mut frames = {
                let sql = format!(
                    "SELECT {} FROM frame_queue
                     WHERE camera_id = ?1 AND status = 'pending'
                     ORDER BY priority DESC, enqueued_at ASC, seq ASC
                     LIMIT ?2",
                    FRAME_COLUMNS
                );
                let mut stmt = tx.prepare(&sql).map_err(storage_err)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![camera_id.as_str(), limit as i64],
                        |row| Ok(row_to_frame(row)),
                    )
                    .map_err(storage_err)?;

                let mut frames = Vec::new();
                for row in rows {
                    let frame = row.map_err(storage_err)??;
                    frames.push(frame);
                }
                frames
            };

            for frame in &mut frames {
                tx.execute(
                    "UPDATE frame_queue SET status = 'processing', batch_id = ?1, claimed_at = ?2
                     WHERE id = ?3 AND status = 'pending'",
                    rusqlite::params![batch_id.as_str(), to_millis(now), frame.id.to_string()],
                )
                .map_err(|e| FramegateError::Storage(format!("Failed to claim frame: {}", e)))?;

                frame.status = FrameStatus::Processing;
                frame.batch_id = Some(batch_id.clone());
                frame.claimed_at = Some(now);
            }

            Ok(frames)
        })
    }

    /// Number of `pending` frames for a camera.
    pub fn pending_count(&self, camera_id: &CameraId) -> Result<u64, FramegateError> {
        self.db.with_conn(|conn| pending_count_in(conn, camera_id))
    }

    /// Hashes of the camera's most recent completed frames enqueued at or
    /// after `since`, newest first.
    pub fn recent_completed_hashes(
        &self,
        camera_id: &CameraId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentHash>, FramegateError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT content_hash FROM frame_queue
                     WHERE camera_id = ?1 AND status = 'completed' AND enqueued_at >= ?2
                     ORDER BY enqueued_at DESC, seq DESC
                     LIMIT ?3",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(
                    rusqlite::params![camera_id.as_str(), to_millis(since), limit as i64],
                    |row| row.get::<_, String>(0),
                )
                .map_err(storage_err)?;

            let mut hashes = Vec::new();
            for row in rows {
                hashes.push(ContentHash(row.map_err(storage_err)?));
            }
            Ok(hashes)
        })
    }

    /// Advance a frame's status. Only forward transitions are accepted.
    pub fn update_status(
        &self,
        frame_id: FrameId,
        next: FrameStatus,
    ) -> Result<(), FramegateError> {
        self.db.with_tx(|tx| transition_in(tx, frame_id, next))
    }

    /// Finish a claimed frame: store its analysis, cache it under the
    /// frame's content hash and mark the frame `completed`.
    ///
    /// All three writes share one transaction. If the frame can no longer
    /// complete (for example the reaper already failed it), nothing is
    /// written and no cache entry becomes visible.
    pub fn complete_with_analysis(
        &self,
        frame: &Frame,
        output: AnalysisOutput,
        now: DateTime<Utc>,
    ) -> Result<Analysis, FramegateError> {
        let analysis = Analysis::from_output(&frame.camera_id, output, now);
        let entry = CacheEntry {
            id: CacheEntryId::new(),
            camera_id: frame.camera_id.clone(),
            content_hash: frame.content_hash.clone(),
            analysis_ref: analysis.id,
            inserted_at: now,
            hit_count: 0,
        };

        self.db.with_tx(|tx| {
            transition_in(tx, frame.id, FrameStatus::Completed)?;
            tx.execute(
                "UPDATE frame_queue SET analysis_ref = ?1 WHERE id = ?2",
                rusqlite::params![analysis.id.to_string(), frame.id.to_string()],
            )
            .map_err(|e| FramegateError::Storage(format!("Failed to link analysis: {}", e)))?;
            insert_analysis_in(tx, &analysis)?;
            insert_cache_entry_in(tx, &entry)?;
            Ok(())
        })?;

        Ok(analysis)
    }

    /// Fetch a frame by id, payload included.
    pub fn get(&self, frame_id: FrameId) -> Result<Option<Frame>, FramegateError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM frame_queue WHERE id = ?1", FRAME_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;

            let result = stmt
                .query_row(rusqlite::params![frame_id.to_string()], |row| {
                    Ok(row_to_frame(row))
                })
                .optional()
                .map_err(storage_err)?;

            match result {
                Some(frame) => Ok(Some(frame?)),
                None => Ok(None),
            }
        })
    }
}

fn pending_count_in(conn: &rusqlite::Connection, camera_id: &CameraId) -> Result<u64, FramegateError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM frame_queue WHERE camera_id = ?1 AND status = 'pending'",
            rusqlite::params![camera_id.as_str()],
            |row| row.get(0),
        )
        .map_err(storage_err)?;
    Ok(count as u64)
}

/// Move a frame to `next`, rejecting backward or repeated transitions.
fn transition_in(
    conn: &rusqlite::Connection,
    frame_id: FrameId,
    next: FrameStatus,
) -> Result<(), FramegateError> {
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM frame_queue WHERE id = ?1",
            rusqlite::params![frame_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err)?;

    let current: FrameStatus = match current {
        Some(s) => s.parse().map_err(FramegateError::Storage)?,
        None => return Err(FramegateError::not_found("frame", frame_id.to_string())),
    };

    if !current.can_transition_to(next) {
        return Err(FramegateError::InvalidInput(format!(
            "Illegal frame transition for {}: {} -> {}",
            frame_id, current, next
        )));
    }

    conn.execute(
        "UPDATE frame_queue SET status = ?1 WHERE id = ?2",
        rusqlite::params![next.as_str(), frame_id.to_string()],
    )
    .map_err(|e| FramegateError::Storage(format!("Failed to update frame: {}", e)))?;
    Ok(())
}

fn row_to_frame(row: &rusqlite::Row) -> Result<Frame, FramegateError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let camera_id: String = row.get(1).map_err(storage_err)?;
    let payload: Vec<u8> = row.get(2).map_err(storage_err)?;
    let content_hash: String = row.get(3).map_err(storage_err)?;
    let priority: i64 = row.get(4).map_err(storage_err)?;
    let enqueued_at: i64 = row.get(5).map_err(storage_err)?;
    let status: String = row.get(6).map_err(storage_err)?;
    let batch_id: Option<String> = row.get(7).map_err(storage_err)?;
    let claimed_at: Option<i64> = row.get(8).map_err(storage_err)?;
    let analysis_ref: Option<String> = row.get(9).map_err(storage_err)?;

    Ok(Frame {
        id: FrameId(parse_uuid(&id)?),
        camera_id: CameraId(camera_id),
        payload,
        content_hash: ContentHash(content_hash),
        priority,
        enqueued_at: from_millis(enqueued_at)?,
        status: status.parse().map_err(FramegateError::Storage)?,
        batch_id: batch_id.map(BatchId),
        claimed_at: claimed_at.map(from_millis).transpose()?,
        analysis_ref: analysis_ref
            .map(|s| parse_uuid(&s).map(AnalysisId))
            .transpose()?,
    })
}
