//! In-memory paste backend. Nothing survives a restart.

use super::{
    Paste, RecoverVisitor, RecoveryStats, Store, StorageError, StorageResult, id::generate,
};
use crate::models::PasteId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::HashMap, time::Duration};
use tracing::instrument;

struct StoredPaste {
    content: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    pastes: RwLock<HashMap<PasteId, StoredPaste>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pastes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pastes.read().is_empty()
    }
}

impl Store for MemoryStore {
    #[instrument(skip(self, content), fields(backend = "mem", size = content.len()))]
    fn put(&self, content: Bytes) -> StorageResult<PasteId> {
        let mut pastes = self.pastes.write();
        let id = generate(|id| !pastes.contains_key(id))?;
        pastes.insert(
            id,
            StoredPaste {
                content,
                modified: Utc::now(),
            },
        );
        Ok(id)
    }

    fn get(&self, id: &PasteId) -> StorageResult<Paste> {
        let pastes = self.pastes.read();
        let stored = pastes.get(id).ok_or(StorageError::NotFound(*id))?;
        Ok(Paste::from_memory(stored.content.clone(), stored.modified))
    }

    #[instrument(skip(self), fields(backend = "mem"))]
    fn delete(&self, id: &PasteId) -> StorageResult<u64> {
        self.pastes
            .write()
            .remove(id)
            .map(|stored| stored.content.len() as u64)
            .ok_or(StorageError::NotFound(*id))
    }

    fn recover(
        &self,
        _lifetime: Option<Duration>,
        _visit: &mut RecoverVisitor<'_>,
    ) -> StorageResult<RecoveryStats> {
        Ok(RecoveryStats::default())
    }

    fn backend_name(&self) -> &'static str {
        "mem"
    }
}
