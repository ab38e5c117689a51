//! Audit ledger: one row per invalid study-link instance, from detection
//! through the replacement attempt to resolution.
//!
//! A partial unique index allows at most one unresolved row per
//! `(roadmap_id, stage_index, step_index, original_url)`, so re-detecting a
//! link that is already on record inserts nothing.

use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use roadmend_shared::{InvalidLinkRecord, LinkOccurrence, NOW_VALID, Result};

use crate::{Storage, db_err, parse_timestamp};

const RECORD_COLUMNS: &str = "id, roadmap_id, stage_index, step_index, original_url, status_code,
     ai_prompt, ai_response, new_url, resolved_at, checked_at";

impl Storage {
    /// ID of the unresolved record for this exact occurrence, if any.
    pub async fn find_unresolved(&self, occurrence: &LinkOccurrence) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM invalid_study_links
                 WHERE roadmap_id = ?1 AND stage_index = ?2 AND step_index = ?3
                   AND original_url = ?4 AND resolved_at IS NULL",
                params![
                    occurrence.roadmap_id.as_str(),
                    occurrence.stage_index as i64,
                    occurrence.step_index as i64,
                    occurrence.url.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Record a newly detected invalid occurrence.
    ///
    /// Returns `None` without writing when an unresolved record for the same
    /// occurrence already exists.
    pub async fn record_invalid(
        &self,
        occurrence: &LinkOccurrence,
        status_code: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO invalid_study_links
                 (roadmap_id, stage_index, step_index, original_url, status_code, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    occurrence.roadmap_id.as_str(),
                    occurrence.stage_index as i64,
                    occurrence.step_index as i64,
                    occurrence.url.as_str(),
                    status_code,
                    checked_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Attach the replacement prompt and raw response, whatever the outcome.
    pub async fn attach_attempt(
        &self,
        record_id: i64,
        ai_prompt: Option<&str>,
        ai_response: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE invalid_study_links SET ai_prompt = ?1, ai_response = ?2 WHERE id = ?3",
                params![ai_prompt, ai_response, record_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Resolve every unresolved record for an occurrence whose link answers
    /// again. Returns the number of records resolved.
    pub async fn mark_now_valid(
        &self,
        occurrence: &LinkOccurrence,
        status_code: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.conn
            .execute(
                "UPDATE invalid_study_links
                 SET resolved_at = ?1, status_code = ?2, new_url = ?3
                 WHERE roadmap_id = ?4 AND stage_index = ?5 AND step_index = ?6
                   AND original_url = ?7 AND resolved_at IS NULL",
                params![
                    resolved_at.to_rfc3339(),
                    status_code,
                    NOW_VALID,
                    occurrence.roadmap_id.as_str(),
                    occurrence.stage_index as i64,
                    occurrence.step_index as i64,
                    occurrence.url.as_str(),
                ],
            )
            .await
            .map_err(db_err)
    }

    /// Fetch one record by ID.
    pub async fn get_invalid_link(&self, record_id: i64) -> Result<Option<InvalidLinkRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM invalid_study_links WHERE id = ?1"),
                params![record_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// List records newest first; unresolved only unless `include_resolved`.
    pub async fn list_invalid_links(
        &self,
        include_resolved: bool,
        limit: u32,
    ) -> Result<Vec<InvalidLinkRecord>> {
        let filter = if include_resolved {
            ""
        } else {
            "WHERE resolved_at IS NULL"
        };
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM invalid_study_links {filter}
                     ORDER BY id DESC LIMIT ?1"
                ),
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }
}

/// Used by [`crate::WriteTxn::mark_resolved`].
pub(crate) async fn mark_resolved_on(
    conn: &Connection,
    record_id: i64,
    new_url: &str,
    resolved_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE invalid_study_links SET new_url = ?1, resolved_at = ?2 WHERE id = ?3",
        params![new_url, resolved_at.to_rfc3339(), record_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Convert a database row to an [`InvalidLinkRecord`].
fn row_to_record(row: &libsql::Row) -> Result<InvalidLinkRecord> {
    Ok(InvalidLinkRecord {
        id: row.get::<i64>(0).map_err(db_err)?,
        roadmap_id: row.get::<String>(1).map_err(db_err)?,
        stage_index: row.get::<i64>(2).map_err(db_err)? as usize,
        step_index: row.get::<i64>(3).map_err(db_err)? as usize,
        original_url: row.get::<String>(4).map_err(db_err)?,
        status_code: row.get::<String>(5).map_err(db_err)?,
        ai_prompt: row.get::<String>(6).ok(),
        ai_response: row.get::<String>(7).ok(),
        new_url: row.get::<String>(8).ok(),
        resolved_at: match row.get::<String>(9).ok() {
            Some(s) => Some(parse_timestamp(&s)?),
            None => None,
        },
        checked_at: parse_timestamp(&row.get::<String>(10).map_err(db_err)?)?,
    })
}
