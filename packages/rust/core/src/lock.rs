//! Lock Guard: a named exclusive lease so that only one repair run executes
//! at a time.
//!
//! Two backends implement [`RunLease`]:
//! - [`FileLease`]: OS advisory lock on a well-known file. The kernel drops
//!   the lock when the process dies, so a crash never leaves a stale lock.
//! - [`DatabaseLease`]: an expiring row in the store's `run_leases` table,
//!   usable when runs start on different hosts. A crashed holder's lease is
//!   taken over once it expires.

use std::fs::{File, OpenOptions, TryLockError};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use roadmend_shared::{Result, RoadmendError};
use roadmend_storage::Storage;

/// Boxed future returned by [`RunLease`] methods.
pub type LeaseFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;

/// Proof of a held lease, passed back to [`RunLease::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    holder: String,
}

impl LeaseToken {
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

/// A named, non-blocking, exclusive lease.
pub trait RunLease {
    fn name(&self) -> &str;

    /// Try to take the lease. `Ok(None)` means another run holds it.
    fn try_acquire(&self) -> LeaseFuture<'_, Option<LeaseToken>>;

    /// Give the lease back. Releasing twice is a no-op.
    fn release<'a>(&'a self, token: &'a LeaseToken) -> LeaseFuture<'a, ()>;
}

fn new_holder() -> String {
    format!("pid-{}-{}", std::process::id(), Uuid::now_v7())
}

// ---------------------------------------------------------------------------
// File lease
// ---------------------------------------------------------------------------

/// Exclusive lock on a file. The file itself is left in place after release.
pub struct FileLease {
    path: PathBuf,
    name: String,
    held: Mutex<Option<File>>,
}

impl FileLease {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            name,
            held: Mutex::new(None),
        }
    }

    fn acquire_sync(&self) -> Result<Option<LeaseToken>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RoadmendError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| RoadmendError::io(&self.path, e))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                debug!(path = %self.path.display(), "lock file held elsewhere");
                return Ok(None);
            }
            Err(TryLockError::Error(e)) => {
                return Err(RoadmendError::Lock(format!(
                    "cannot lock {}: {e}",
                    self.path.display()
                )));
            }
        }

        let holder = new_holder();
        // Holder info is informational only; the lock is what counts.
        let stamp = file
            .set_len(0)
            .and_then(|()| writeln!(file, "{holder} {}", Utc::now().to_rfc3339()));
        if let Err(e) = stamp {
            warn!(path = %self.path.display(), error = %e, "could not write lock holder");
        }

        *self.held.lock().unwrap_or_else(|p| p.into_inner()) = Some(file);
        Ok(Some(LeaseToken { holder }))
    }

    fn release_sync(&self) {
        let file = self.held.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(file) = file {
            if let Err(e) = file.unlock() {
                warn!(path = %self.path.display(), error = %e, "could not unlock lock file");
            }
        }
    }
}

impl RunLease for FileLease {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&self) -> LeaseFuture<'_, Option<LeaseToken>> {
        Box::pin(async move { self.acquire_sync() })
    }

    fn release<'a>(&'a self, _token: &'a LeaseToken) -> LeaseFuture<'a, ()> {
        Box::pin(async move {
            self.release_sync();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Database lease
// ---------------------------------------------------------------------------

/// Expiring lease row in the shared store.
pub struct DatabaseLease<'s> {
    storage: &'s Storage,
    name: String,
    ttl: Duration,
}

impl<'s> DatabaseLease<'s> {
    pub fn new(storage: &'s Storage, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            storage,
            name: name.into(),
            ttl,
        }
    }
}

impl RunLease for DatabaseLease<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&self) -> LeaseFuture<'_, Option<LeaseToken>> {
        Box::pin(async move {
            let holder = new_holder();
            let acquired = self
                .storage
                .try_acquire_lease(&self.name, &holder, Utc::now(), self.ttl)
                .await?;
            if acquired {
                Ok(Some(LeaseToken { holder }))
            } else {
                let current = self.storage.lease_holder(&self.name).await?;
                debug!(name = %self.name, holder = ?current, "lease held elsewhere");
                Ok(None)
            }
        })
    }

    fn release<'a>(&'a self, token: &'a LeaseToken) -> LeaseFuture<'a, ()> {
        Box::pin(async move {
            if !self.storage.release_lease(&self.name, &token.holder).await? {
                debug!(name = %self.name, "lease already released or taken over");
            }
            Ok(())
        })
    }
}
