//! PasteService: the store API used by the request layer.
//!
//! Composes one backend with the quota tracker and the deletion scheduler:
//!
//! - `put` reserves quota, persists, then arms the expiry timer; a failed
//!   write gives the reservation back.
//! - `delete` deletes, then cancels the timer and releases the freed bytes.
//! - `recover` rebuilds quota usage and timers from persisted pastes.
//!
//! All methods are synchronous and may block on disk I/O or, for the mapped
//! backend, on readers finishing. Async callers should use `spawn_blocking`.

use super::scheduler::DeletionScheduler;
use crate::{
    models::PasteId,
    storage::{
        Paste, QuotaLimits, QuotaReport, QuotaTracker, RecoveryStats, Store, StorageError,
        StorageResult,
    },
};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tracing::{debug, info};

#[derive(Clone)]
pub struct PasteService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    quota: Arc<QuotaTracker>,
    scheduler: DeletionScheduler,
    lifetime: Option<Duration>,
}

impl PasteService {
    /// Build a service whose timers run on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(store: Arc<dyn Store>, limits: QuotaLimits, lifetime: Option<Duration>) -> Self {
        Self::with_runtime(store, limits, lifetime, Handle::current())
    }

    pub fn with_runtime(
        store: Arc<dyn Store>,
        limits: QuotaLimits,
        lifetime: Option<Duration>,
        runtime: Handle,
    ) -> Self {
        let quota = Arc::new(QuotaTracker::new(limits));
        let scheduler = DeletionScheduler::new(Arc::clone(&store), Arc::clone(&quota), runtime);
        Self {
            inner: Arc::new(Inner {
                store,
                quota,
                scheduler,
                lifetime: lifetime.filter(|l| !l.is_zero()),
            }),
        }
    }

    /// Store a new paste and schedule its expiry.
    pub fn put(&self, content: Bytes) -> StorageResult<PasteId> {
        if content.is_empty() {
            return Err(StorageError::EmptyPaste);
        }
        let size = content.len() as u64;
        self.inner.quota.reserve(size)?;

        let id = match self.inner.store.put(content) {
            Ok(id) => id,
            Err(err) => {
                self.inner.quota.release(size);
                return Err(err);
            }
        };

        self.inner.scheduler.arm(id, size, self.inner.lifetime);
        debug!(%id, size, "stored paste");
        Ok(id)
    }

    pub fn get(&self, id: &PasteId) -> StorageResult<Paste> {
        self.inner.store.get(id)
    }

    /// Delete a paste ahead of its expiry.
    ///
    /// The timer is only cancelled once the backend has let go of the paste,
    /// so a failed delete leaves it live, counted and still set to expire.
    pub fn delete(&self, id: &PasteId) -> StorageResult<()> {
        let freed = self.inner.store.delete(id)?;
        self.inner.scheduler.cancel(id);
        self.inner.quota.release(freed);
        debug!(%id, freed, "deleted paste");
        Ok(())
    }

    pub fn report(&self) -> QuotaReport {
        self.inner.quota.report()
    }

    /// Rebuild state from the backend's persisted pastes.
    ///
    /// Run once at startup, before serving traffic. Fails if the persisted
    /// pastes no longer fit within the configured quota.
    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        let inner = &self.inner;
        let stats = inner.store.recover(inner.lifetime, &mut |paste| {
            inner.quota.reserve(paste.size)?;
            inner.scheduler.arm(paste.id, paste.size, paste.remaining);
            Ok(())
        })?;
        info!(
            backend = inner.store.backend_name(),
            restored = stats.restored,
            expired = stats.expired,
            discarded = stats.discarded,
            "recovered pastes"
        );
        Ok(stats)
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.inner.quota
    }

    /// Configured paste lifetime, `None` when expiry is disabled.
    pub fn lifetime(&self) -> Option<Duration> {
        self.inner.lifetime
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.store.backend_name()
    }

    /// Number of expiry timers still pending.
    pub fn scheduled_deletions(&self) -> usize {
        self.inner.scheduler.pending()
    }
}
