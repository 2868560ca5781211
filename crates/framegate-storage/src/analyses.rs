//! Persisted analysis results.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use framegate_core::error::FramegateError;
use framegate_core::types::{Analysis, AnalysisId, AnalysisOutput, CameraId};

use crate::db::{from_millis, parse_uuid, storage_err, to_millis, Database, OptionalExt};

/// Repository for analysis documents.
pub struct AnalysisRepository {
    db: Arc<Database>,
}

impl AnalysisRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store the output of one analyze call. Any detected issue marks the
    /// record as requiring action.
    pub fn store(
        &self,
        camera_id: &CameraId,
        output: AnalysisOutput,
        now: DateTime<Utc>,
    ) -> Result<Analysis, FramegateError> {
        let analysis = Analysis::from_output(camera_id, output, now);
        self.db.with_conn(|conn| insert_analysis_in(conn, &analysis))?;
        Ok(analysis)
    }

    pub fn get(&self, id: AnalysisId) -> Result<Option<Analysis>, FramegateError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, camera_id, analysis_text, detected_issues, requires_action, created_at
                     FROM analyses WHERE id = ?1",
                )
                .map_err(storage_err)?;

            let result = stmt
                .query_row(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_analysis(row))
                })
                .optional()
                .map_err(storage_err)?;

            match result {
                Some(analysis) => Ok(Some(analysis?)),
                None => Ok(None),
            }
        })
    }
}

pub(crate) fn insert_analysis_in(
    conn: &rusqlite::Connection,
    analysis: &Analysis,
) -> Result<(), FramegateError> {
    let issues = serde_json::to_string(&analysis.detected_issues)?;
    conn.execute(
        "INSERT INTO analyses (id, camera_id, analysis_text, detected_issues, requires_action, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            analysis.id.to_string(),
            analysis.camera_id.as_str(),
            analysis.analysis_text,
            issues,
            analysis.requires_action as i32,
            to_millis(analysis.created_at),
        ],
    )
    .map_err(|e| FramegateError::Storage(format!("Failed to store analysis: {}", e)))?;
    Ok(())
}

fn row_to_analysis(row: &rusqlite::Row) -> Result<Analysis, FramegateError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let camera_id: String = row.get(1).map_err(storage_err)?;
    let analysis_text: String = row.get(2).map_err(storage_err)?;
    let detected_issues: String = row.get(3).map_err(storage_err)?;
    let requires_action: i32 = row.get(4).map_err(storage_err)?;
    let created_at: i64 = row.get(5).map_err(storage_err)?;

    Ok(Analysis {
        id: AnalysisId(parse_uuid(&id)?),
        camera_id: CameraId(camera_id),
        analysis_text,
        detected_issues: serde_json::from_str(&detected_issues)?,
        requires_action: requires_action != 0,
        created_at: from_millis(created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> AnalysisRepository {
        AnalysisRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_store_and_get() {
        let repo = make_repo();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let stored = repo
            .store(
                &CameraId::new("cam-1"),
                AnalysisOutput {
                    analysis_text: "Loose cable near panel".to_string(),
                    detected_issues: vec!["loose cable near panel".to_string()],
                },
                now,
            )
            .unwrap();
        assert!(stored.requires_action);

        let fetched = repo.get(stored.id).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_no_issues_needs_no_action() {
        let repo = make_repo();
        let stored = repo
            .store(
                &CameraId::new("cam-1"),
                AnalysisOutput {
                    analysis_text: "All clear".to_string(),
                    detected_issues: Vec::new(),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(!stored.requires_action);
    }

    #[test]
    fn test_get_unknown() {
        let repo = make_repo();
        assert!(repo.get(AnalysisId::new()).unwrap().is_none());
    }
}
