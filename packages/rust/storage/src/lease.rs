//! Named, expiring leases used as a database-backed run lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use libsql::params;
use roadmend_shared::Result;

use crate::{Storage, db_err};

impl Storage {
    /// Try to take the lease `name` for `holder`.
    ///
    /// Succeeds when nobody holds it or the current holder's lease has
    /// expired. A single upsert decides, so two contenders cannot both win.
    pub async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let now_ms = now.timestamp_millis();
        let expires_ms = now_ms.saturating_add(ttl.as_millis() as i64);
        let changed = self
            .conn
            .execute(
                "INSERT INTO run_leases (name, holder, acquired_at_ms, expires_at_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   holder = excluded.holder,
                   acquired_at_ms = excluded.acquired_at_ms,
                   expires_at_ms = excluded.expires_at_ms
                 WHERE run_leases.expires_at_ms <= ?3",
                params![name, holder, now_ms, expires_ms],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Drop the lease if `holder` still owns it. Returns whether a row was removed.
    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM run_leases WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Current holder of a lease, if any row exists (expired or not).
    pub async fn lease_holder(&self, name: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT holder FROM run_leases WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }
}
