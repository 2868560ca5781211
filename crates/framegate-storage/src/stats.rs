//! Read-only aggregation over cache, queue and batch tables.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use framegate_core::error::FramegateError;

use crate::db::{storage_err, Database};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_hits: u64,
    /// `hits / (hits + submissions)`, where submissions are frame rows.
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub total: u64,
}

/// Snapshot returned by [`StatsReporter::collect`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub cache: CacheStats,
    pub queue: QueueStats,
    pub batches: BatchStats,
}

/// Aggregates pipeline counters. Never mutates.
pub struct StatsReporter {
    db: Arc<Database>,
}

impl StatsReporter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Collect all counters under a single connection lock so the three
    /// sections describe the same instant.
    pub fn collect(&self) -> Result<PipelineStats, FramegateError> {
        self.db.with_conn(|conn| {
            let (total_entries, total_hits): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM frame_cache",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(storage_err)?;

            let mut queue = QueueStats::default();
            {
                let mut stmt = conn
                    .prepare("SELECT status, COUNT(*) FROM frame_queue GROUP BY status")
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                    .map_err(storage_err)?;
                for row in rows {
                    let (status, count) = row.map_err(storage_err)?;
                    let count = count as u64;
                    match status.as_str() {
                        "pending" => queue.pending = count,
                        "processing" => queue.processing = count,
                        "completed" => queue.completed = count,
                        "failed" => queue.failed = count,
                        _ => {}
                    }
                    queue.total += count;
                }
            }

            let mut batches = BatchStats::default();
            {
                let mut stmt = conn
                    .prepare("SELECT status, COUNT(*) FROM batches GROUP BY status")
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                    .map_err(storage_err)?;
                for row in rows {
                    let (status, count) = row.map_err(storage_err)?;
                    let count = count as u64;
                    match status.as_str() {
                        "queued" => batches.queued = count,
                        "processing" => batches.processing = count,
                        "completed" => batches.completed = count,
                        _ => {}
                    }
                    batches.total += count;
                }
            }

            let total_hits = total_hits.max(0) as u64;
            Ok(PipelineStats {
                cache: CacheStats {
                    total_entries: total_entries as u64,
                    total_hits,
                    hit_rate: hit_rate(total_hits, queue.total),
                },
                queue,
                batches,
            })
        })
    }
}

fn hit_rate(hits: u64, submissions: u64) -> f64 {
    let denominator = hits + submissions;
    if denominator == 0 {
        0.0
    } else {
        hits as f64 / denominator as f64
    }
}
