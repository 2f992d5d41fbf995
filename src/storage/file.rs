//! Plain-file paste backend: one file per paste, read straight from disk.

use super::{
    Paste, RecoverVisitor, RecoveredPaste, RecoveryStats, Store, StorageError, StorageResult,
    id::generate, layout::Layout,
};
use crate::models::PasteId;
use bytes::Bytes;
use parking_lot::RwLock;
use std::{collections::HashSet, fs, io, path::Path, time::Duration};
use tracing::instrument;

pub struct FileStore {
    layout: Layout,
    /// Ids handed out to writes that have not finished renaming yet.
    claims: RwLock<HashSet<PasteId>>,
}

impl FileStore {
    pub fn new(root: &Path) -> StorageResult<Self> {
        Ok(Self {
            layout: Layout::create(root)?,
            claims: RwLock::new(HashSet::new()),
        })
    }
}

fn missing_as_not_found(err: io::Error, id: &PasteId) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(*id)
    } else {
        StorageError::Io(err)
    }
}

impl Store for FileStore {
    #[instrument(skip(self, content), fields(backend = "fs", size = content.len()))]
    fn put(&self, content: Bytes) -> StorageResult<PasteId> {
        let id = {
            let mut claims = self.claims.write();
            let id =
                generate(|id| !claims.contains(id) && !self.layout.path_for(id).exists())?;
            claims.insert(id);
            id
        };

        let written = self.layout.write_new(&id, &content);
        self.claims.write().remove(&id);
        written?;
        Ok(id)
    }

    fn get(&self, id: &PasteId) -> StorageResult<Paste> {
        let path = self.layout.path_for(id);
        let file = fs::File::open(&path).map_err(|err| missing_as_not_found(err, id))?;
        let metadata = file.metadata()?;
        Ok(Paste::from_file(
            file,
            metadata.len(),
            metadata.modified()?.into(),
        ))
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    fn delete(&self, id: &PasteId) -> StorageResult<u64> {
        let path = self.layout.path_for(id);
        let size = fs::metadata(&path)
            .map_err(|err| missing_as_not_found(err, id))?
            .len();
        fs::remove_file(&path).map_err(|err| missing_as_not_found(err, id))?;
        Ok(size)
    }

    #[instrument(skip(self, visit), fields(backend = "fs", root = %self.layout.root().display()))]
    fn recover(
        &self,
        lifetime: Option<Duration>,
        visit: &mut RecoverVisitor<'_>,
    ) -> StorageResult<RecoveryStats> {
        self.layout.scan(lifetime, |file| {
            visit(RecoveredPaste {
                id: file.id,
                size: file.size,
                modified: file.modified,
                remaining: file.remaining,
            })
        })
    }

    fn backend_name(&self) -> &'static str {
        "fs"
    }
}
