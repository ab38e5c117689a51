//! Write transaction used by the document patcher.

use chrono::{DateTime, Utc};
use libsql::{Transaction, params};
use roadmend_shared::Result;

use crate::{db_err, ledger};

/// An open `IMMEDIATE` transaction. Nothing is visible to other connections
/// until [`WriteTxn::commit`]; dropping without committing rolls back.
pub struct WriteTxn {
    tx: Transaction,
}

impl WriteTxn {
    pub(crate) fn new(tx: Transaction) -> Self {
        Self { tx }
    }

    /// Read a roadmap body under the transaction's write lock.
    pub async fn read_roadmap_json(&self, id: &str) -> Result<Option<String>> {
        let mut rows = self
            .tx
            .query(
                "SELECT roadmap_json FROM roadmaps WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Replace a roadmap body.
    pub async fn write_roadmap_json(&self, id: &str, roadmap_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.tx
            .execute(
                "UPDATE roadmaps SET roadmap_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![roadmap_json, now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Mark an audit record resolved as part of this transaction.
    pub async fn mark_resolved(
        &self,
        record_id: i64,
        new_url: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        ledger::mark_resolved_on(&self.tx, record_id, new_url, resolved_at).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
