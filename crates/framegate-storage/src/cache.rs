//! Content-addressed analysis cache.
//!
//! Entries are append-only per (camera, content hash). Freshness is decided
//! at read time against the configured TTL; expired rows are left for the
//! janitor to delete.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use framegate_core::error::FramegateError;
use framegate_core::types::{AnalysisId, CacheEntry, CacheEntryId, CameraId, ContentHash};

use crate::db::{from_millis, parse_uuid, storage_err, to_millis, Database, OptionalExt};

/// Repository for cached analysis references.
pub struct CacheRepository {
    db: Arc<Database>,
    ttl: Duration,
}

impl CacheRepository {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Most recent live entry for `(camera_id, hash)` as of `now`.
    ///
    /// An entry inserted exactly `ttl` ago is still live.
    pub fn lookup(
        &self,
        camera_id: &CameraId,
        hash: &ContentHash,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, FramegateError> {
        let cutoff = to_millis(now - self.ttl);
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, camera_id, content_hash, analysis_ref, inserted_at, hit_count
                     FROM frame_cache
                     WHERE camera_id = ?1 AND content_hash = ?2 AND inserted_at >= ?3
                     ORDER BY inserted_at DESC, rowid DESC
                     LIMIT 1",
                )
                .map_err(storage_err)?;

            let result = stmt
                .query_row(
                    rusqlite::params![camera_id.as_str(), hash.as_str(), cutoff],
                    |row| Ok(row_to_cache_entry(row)),
                )
                .optional()
                .map_err(storage_err)?;

            match result {
                Some(entry) => Ok(Some(entry?)),
                None => Ok(None),
            }
        })
    }

    /// Increment the hit counter in place.
    pub fn record_hit(&self, id: CacheEntryId) -> Result<(), FramegateError> {
        self.db.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE frame_cache SET hit_count = hit_count + 1 WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| FramegateError::Storage(format!("Failed to record hit: {}", e)))?;
            if updated == 0 {
                return Err(FramegateError::not_found("cache entry", id.to_string()));
            }
            Ok(())
        })
    }

    /// Append a fresh entry with a zero hit count.
    pub fn insert(
        &self,
        camera_id: &CameraId,
        hash: &ContentHash,
        analysis_ref: AnalysisId,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, FramegateError> {
        let entry = CacheEntry {
            id: CacheEntryId::new(),
            camera_id: camera_id.clone(),
            content_hash: hash.clone(),
            analysis_ref,
            inserted_at: now,
            hit_count: 0,
        };

        self.db.with_conn(|conn| insert_cache_entry_in(conn, &entry))?;
        Ok(entry)
    }

    /// Fetch an entry by id regardless of age.
    pub fn get(&self, id: CacheEntryId) -> Result<Option<CacheEntry>, FramegateError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, camera_id, content_hash, analysis_ref, inserted_at, hit_count
                     FROM frame_cache WHERE id = ?1",
                )
                .map_err(storage_err)?;

            let result = stmt
                .query_row(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_cache_entry(row))
                })
                .optional()
                .map_err(storage_err)?;

            match result {
                Some(entry) => Ok(Some(entry?)),
                None => Ok(None),
            }
        })
    }

    /// Total number of stored entries, live or expired.
    pub fn count(&self) -> Result<u64, FramegateError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM frame_cache", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

pub(crate) fn insert_cache_entry_in(
    conn: &rusqlite::Connection,
    entry: &CacheEntry,
) -> Result<(), FramegateError> {
    conn.execute(
        "INSERT INTO frame_cache (id, camera_id, content_hash, analysis_ref, inserted_at, hit_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            entry.id.to_string(),
            entry.camera_id.as_str(),
            entry.content_hash.as_str(),
            entry.analysis_ref.to_string(),
            to_millis(entry.inserted_at),
            entry.hit_count as i64,
        ],
    )
    .map_err(|e| FramegateError::Storage(format!("Failed to insert cache entry: {}", e)))?;
    Ok(())
}

fn row_to_cache_entry(row: &rusqlite::Row) -> Result<CacheEntry, FramegateError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let camera_id: String = row.get(1).map_err(storage_err)?;
    let content_hash: String = row.get(2).map_err(storage_err)?;
    let analysis_ref: String = row.get(3).map_err(storage_err)?;
    let inserted_at: i64 = row.get(4).map_err(storage_err)?;
    let hit_count: i64 = row.get(5).map_err(storage_err)?;

    Ok(CacheEntry {
        id: CacheEntryId(parse_uuid(&id)?),
        camera_id: CameraId(camera_id),
        content_hash: ContentHash(content_hash),
        analysis_ref: AnalysisId(parse_uuid(&analysis_ref)?),
        inserted_at: from_millis(inserted_at)?,
        hit_count: hit_count.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegate_core::hash::hash_payload;

    fn make_repo() -> CacheRepository {
        let db = Arc::new(Database::in_memory().unwrap());
        CacheRepository::new(db, Duration::hours(24))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_lookup_empty_returns_none() {
        let repo = make_repo();
        let found = repo
            .lookup(&CameraId::new("cam-1"), &hash_payload(b"x"), t0())
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_insert_then_lookup() {
        let repo = make_repo();
        let cam = CameraId::new("cam-1");
        let hash = hash_payload(b"frame");
        let analysis = AnalysisId::new();

        let inserted = repo.insert(&cam, &hash, analysis, t0()).unwrap();
        assert_eq!(inserted.hit_count, 0);

        let found = repo.lookup(&cam, &hash, t0()).unwrap().unwrap();
        assert_eq!(found, inserted);
        assert_eq!(found.analysis_ref, analysis);
    }

    #[test]
    fn test_ttl_boundary() {
        let repo = make_repo();
        let cam = CameraId::new("cam-1");
        let hash = hash_payload(b"frame");
        repo.insert(&cam, &hash, AnalysisId::new(), t0()).unwrap();

        let just_inside = t0() + Duration::hours(23) + Duration::minutes(59);
        assert!(repo.lookup(&cam, &hash, just_inside).unwrap().is_some());

        let just_outside = t0() + Duration::hours(24) + Duration::minutes(1);
        assert!(repo.lookup(&cam, &hash, just_outside).unwrap().is_none());
    }

    #[test]
    fn test_lookup_isolated_per_camera() {
        let repo = make_repo();
        let hash = hash_payload(b"shared bytes");
        repo.insert(&CameraId::new("cam-a"), &hash, AnalysisId::new(), t0())
            .unwrap();

        assert!(repo
            .lookup(&CameraId::new("cam-b"), &hash, t0())
            .unwrap()
            .is_none());
        assert!(repo
            .lookup(&CameraId::new("cam-a"), &hash, t0())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_lookup_returns_newest_entry() {
        let repo = make_repo();
        let cam = CameraId::new("cam-1");
        let hash = hash_payload(b"frame");
        let older = AnalysisId::new();
        let newer = AnalysisId::new();

        repo.insert(&cam, &hash, older, t0()).unwrap();
        repo.insert(&cam, &hash, newer, t0() + Duration::minutes(10))
            .unwrap();

        let found = repo
            .lookup(&cam, &hash, t0() + Duration::minutes(11))
            .unwrap()
            .unwrap();
        assert_eq!(found.analysis_ref, newer);
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn test_record_hit_increments() {
        let repo = make_repo();
        let entry = repo
            .insert(
                &CameraId::new("cam-1"),
                &hash_payload(b"frame"),
                AnalysisId::new(),
                t0(),
            )
            .unwrap();

        repo.record_hit(entry.id).unwrap();
        repo.record_hit(entry.id).unwrap();
        repo.record_hit(entry.id).unwrap();

        let stored = repo.get(entry.id).unwrap().unwrap();
        assert_eq!(stored.hit_count, 3);
    }

    #[test]
    fn test_record_hit_unknown_entry() {
        let repo = make_repo();
        let err = repo.record_hit(CacheEntryId::new()).unwrap_err();
        assert!(matches!(err, FramegateError::NotFound { .. }));
    }

    #[test]
    fn test_concurrent_hits_are_not_lost() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = Arc::new(CacheRepository::new(db, Duration::hours(24)));
        let entry = repo
            .insert(
                &CameraId::new("cam-1"),
                &hash_payload(b"frame"),
                AnalysisId::new(),
                t0(),
            )
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        repo.record_hit(entry.id).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(repo.get(entry.id).unwrap().unwrap().hit_count, 200);
    }
}
