//! Database schema migrations.
//!
//! Applies the initial schema: frame_cache, frame_queue, batches,
//! analyses and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use framegate_core::error::FramegateError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), FramegateError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| FramegateError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            FramegateError::Storage(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), FramegateError> {
    conn.execute_batch(
        "
        -- Analysis documents referenced by cache entries and batch results.
        CREATE TABLE IF NOT EXISTS analyses (
            id              TEXT PRIMARY KEY NOT NULL,
            camera_id       TEXT NOT NULL,
            analysis_text   TEXT NOT NULL,
            detected_issues TEXT NOT NULL DEFAULT '[]',
            requires_action INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_analyses_camera
            ON analyses (camera_id, created_at DESC);

        -- Content-addressed analysis cache.
        CREATE TABLE IF NOT EXISTS frame_cache (
            id              TEXT PRIMARY KEY NOT NULL,
            camera_id       TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            analysis_ref    TEXT NOT NULL,
            inserted_at     INTEGER NOT NULL,
            hit_count       INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_frame_cache_lookup
            ON frame_cache (camera_id, content_hash, inserted_at DESC);

        CREATE INDEX IF NOT EXISTS idx_frame_cache_inserted
            ON frame_cache (inserted_at);

        -- Prioritized intake queue. seq breaks ties between equal
        -- priority and timestamp in insertion order.
        CREATE TABLE IF NOT EXISTS frame_queue (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            camera_id       TEXT NOT NULL,
            payload         BLOB NOT NULL,
            content_hash    TEXT NOT NULL,
            priority        INTEGER NOT NULL DEFAULT 1,
            enqueued_at     INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
            batch_id        TEXT,
            claimed_at      INTEGER,
            analysis_ref    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_frame_queue_drain
            ON frame_queue (camera_id, status, priority DESC, enqueued_at ASC);

        CREATE INDEX IF NOT EXISTS idx_frame_queue_status
            ON frame_queue (status, enqueued_at);

        CREATE INDEX IF NOT EXISTS idx_frame_queue_batch
            ON frame_queue (batch_id);

        -- Batch records.
        CREATE TABLE IF NOT EXISTS batches (
            id              TEXT PRIMARY KEY NOT NULL,
            camera_id       TEXT NOT NULL,
            frame_ids       TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL
                            CHECK (status IN ('queued', 'processing', 'completed')),
            started_at      INTEGER NOT NULL,
            completed_at    INTEGER,
            results         TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_batches_status
            ON batches (status);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| FramegateError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
