//! libSQL storage layer: roadmap documents, the invalid-link audit ledger,
//! and the run lease table.
//!
//! The [`Storage`] struct wraps one libSQL connection, local file or remote.
//! Writes that must not interleave with another writer go through
//! [`WriteTxn`], an `IMMEDIATE` transaction that holds the database write
//! lock from its first read until commit or rollback.

mod ledger;
mod lease;
mod migrations;
mod roadmaps;
mod txn;

use std::path::Path;

use libsql::{Connection, Database, params};
use roadmend_shared::{DatabaseConfig, Result, RoadmendError, expand_home};

pub use txn::WriteTxn;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a local database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RoadmendError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open the database described by `[database]`: remote when `url` is set,
    /// otherwise the local file at `path`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let storage = match &config.url {
            Some(url) => {
                let token = std::env::var(&config.auth_token_env).unwrap_or_default();
                let db = libsql::Builder::new_remote(url.clone(), token)
                    .build()
                    .await
                    .map_err(db_err)?;
                let conn = db.connect().map_err(db_err)?;
                let storage = Self { db, conn };
                storage.run_migrations().await?;
                storage
            }
            None => {
                let storage = Self::open(&expand_home(&config.path)?).await?;
                storage.set_busy_timeout(config.busy_timeout_ms).await?;
                storage
            }
        };
        Ok(storage)
    }

    /// Make a locked database wait instead of failing immediately.
    async fn set_busy_timeout(&self, millis: u64) -> Result<()> {
        let mut rows = self
            .conn
            .query(&format!("PRAGMA busy_timeout = {millis}"), params![])
            .await
            .map_err(db_err)?;
        while let Ok(Some(_)) = rows.next().await {}
        Ok(())
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RoadmendError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Cheap round trip used to fail fast when the store is unreachable.
    pub async fn ping(&self) -> Result<()> {
        let mut rows = self.conn.query("SELECT 1", params![]).await.map_err(db_err)?;
        rows.next().await.map_err(db_err)?;
        Ok(())
    }
}

/// Map a libSQL error into the storage variant.
pub(crate) fn db_err(e: libsql::Error) -> RoadmendError {
    RoadmendError::Storage(e.to_string())
}

/// Parse an RFC 3339 column value.
pub(crate) fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| RoadmendError::Storage(format!("invalid date: {e}")))
}
