//! One-shot expiry timers, one per live paste.

use crate::{
    models::PasteId,
    storage::{QuotaTracker, Store, StorageError},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{runtime::Handle, task::AbortHandle};
use tracing::{debug, warn};

/// Deletes pastes when their lifetime runs out and returns their quota.
///
/// Timers are keyed by id and can be cancelled, which explicit deletes do to
/// avoid a second deletion attempt. A timer that fires after its paste is
/// already gone is a no-op.
pub struct DeletionScheduler {
    store: Arc<dyn Store>,
    quota: Arc<QuotaTracker>,
    runtime: Handle,
    timers: Arc<Mutex<HashMap<PasteId, AbortHandle>>>,
}

impl DeletionScheduler {
    pub fn new(store: Arc<dyn Store>, quota: Arc<QuotaTracker>, runtime: Handle) -> Self {
        Self {
            store,
            quota,
            runtime,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule deletion of `id` after `remaining`.
    ///
    /// `None` means expiry is disabled and nothing is scheduled. A zero
    /// duration deletes the paste before returning.
    pub fn arm(&self, id: PasteId, size: u64, remaining: Option<Duration>) {
        let Some(remaining) = remaining else {
            return;
        };
        if remaining.is_zero() {
            expire(self.store.as_ref(), &self.quota, id, size);
            return;
        }

        let store = Arc::clone(&self.store);
        let quota = Arc::clone(&self.quota);
        let timers = Arc::clone(&self.timers);
        // Hold the map while spawning so the timer cannot deregister before
        // it is registered.
        let mut pending = self.timers.lock();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            timers.lock().remove(&id);
            let deletion =
                tokio::task::spawn_blocking(move || expire(store.as_ref(), &quota, id, size));
            if let Err(err) = deletion.await {
                warn!(%id, error = %err, "expiry task failed");
            }
        });
        if let Some(stale) = pending.insert(id, task.abort_handle()) {
            stale.abort();
        }
        debug!(%id, after = ?remaining, "scheduled paste deletion");
    }

    /// Cancel the pending timer for `id`. Returns whether one was pending.
    pub fn cancel(&self, id: &PasteId) -> bool {
        match self.timers.lock().remove(id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Number of timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for DeletionScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
    }
}

fn expire(store: &dyn Store, quota: &QuotaTracker, id: PasteId, size: u64) {
    match store.delete(&id) {
        Ok(_) => {
            quota.release(size);
            debug!(%id, size, "deleted expired paste");
        }
        Err(StorageError::NotFound(_)) => debug!(%id, "expired paste was already deleted"),
        Err(err) => warn!(%id, error = %err, "failed to delete expired paste"),
    }
}
