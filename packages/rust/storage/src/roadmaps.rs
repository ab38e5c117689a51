//! Roadmap document operations.

use chrono::Utc;
use libsql::params;
use roadmend_shared::{Result, RoadmapRow};

use crate::txn::WriteTxn;
use crate::{Storage, db_err};

impl Storage {
    /// Insert a roadmap document.
    pub async fn insert_roadmap(
        &self,
        id: &str,
        user_id: Option<&str>,
        domain: &str,
        roadmap_json: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO roadmaps (id, user_id, domain, roadmap_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, user_id, domain, roadmap_json, now.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// List every roadmap in insertion order.
    pub async fn list_roadmaps(&self) -> Result<Vec<RoadmapRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, domain, roadmap_json FROM roadmaps ORDER BY rowid",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(RoadmapRow {
                id: row.get::<String>(0).map_err(db_err)?,
                domain: row.get::<String>(1).map_err(db_err)?,
                roadmap_json: row.get::<String>(2).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    /// Get a roadmap's JSON body by ID.
    pub async fn get_roadmap(&self, id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
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

    /// Overwrite a roadmap's JSON body outside any repair transaction.
    /// Returns `false` if no such roadmap exists.
    pub async fn write_roadmap(&self, id: &str, roadmap_json: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE roadmaps SET roadmap_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![roadmap_json, now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Start an `IMMEDIATE` transaction: the write lock is taken before the
    /// first read, so nothing can change a document between read and write.
    pub async fn begin_write(&self) -> Result<WriteTxn> {
        let tx = self
            .conn
            .transaction_with_behavior(libsql::TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        Ok(WriteTxn::new(tx))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_storage;

    #[tokio::test]
    async fn roadmap_crud() {
        let storage = test_storage().await;

        storage
            .insert_roadmap("r1", Some("u1"), "Frontend Developer", r#"{"roadmap":[]}"#)
            .await
            .expect("insert");
        storage
            .insert_roadmap("r2", None, "Data Engineer", "{}")
            .await
            .expect("insert");

        let rows = storage.list_roadmaps().await.expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "r1");
        assert_eq!(rows[0].domain, "Frontend Developer");
        assert_eq!(rows[1].roadmap_json, "{}");

        assert!(storage.write_roadmap("r1", r#"{"roadmap":[{}]}"#).await.unwrap());
        assert!(!storage.write_roadmap("missing", "{}").await.unwrap());
        assert_eq!(
            storage.get_roadmap("r1").await.unwrap().as_deref(),
            Some(r#"{"roadmap":[{}]}"#)
        );
        assert!(storage.get_roadmap("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_roadmap_id_is_rejected() {
        let storage = test_storage().await;
        storage.insert_roadmap("r1", None, "d", "{}").await.unwrap();
        let err = storage.insert_roadmap("r1", None, "d", "{}").await;
        assert!(err.is_err());
    }
}
