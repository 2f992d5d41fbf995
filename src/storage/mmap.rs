//! Memory-mapped paste backend.
//!
//! Pastes are persisted exactly like [`FileStore`](super::FileStore), but
//! every live paste also keeps a read-only mapping in a cache entry so reads
//! never touch the disk. Each entry counts the read handles currently using
//! its mapping.
//!
//! Deleting follows a strict order:
//!
//! 1. remove the entry from the table under the write lock, so no new
//!    reader can attach;
//! 2. release the lock;
//! 3. block until the entry's reader count drops to zero;
//! 4. drop the mapping and remove the backing file.
//!
//! Readers that started before the delete always finish their reads.

use super::{
    Paste, RecoverVisitor, RecoveredPaste, RecoveryStats, Store, StorageError, StorageResult,
    id::generate, layout::Layout,
};
use crate::models::PasteId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    mem::ManuallyDrop,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, instrument, warn};

/// Number of read handles attached to one mapping.
#[derive(Default)]
struct ReaderCount {
    active: Mutex<usize>,
    idle: Condvar,
}

impl ReaderCount {
    fn acquire(&self) {
        *self.active.lock() += 1;
    }

    fn release(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut active = self.active.lock();
        while *active > 0 {
            self.idle.wait(&mut active);
        }
    }

    fn get(&self) -> usize {
        *self.active.lock()
    }
}

struct CacheEntry {
    path: PathBuf,
    map: Mmap,
    size: u64,
    modified: DateTime<Utc>,
    readers: Arc<ReaderCount>,
}

impl CacheEntry {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = fs::File::open(&path)?;
        let metadata = file.metadata()?;
        // SAFETY: paste files are never written after the rename that
        // publishes them, and are only removed once no reader is left.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path,
            map,
            size: metadata.len(),
            modified: metadata.modified()?.into(),
            readers: Arc::default(),
        })
    }
}

/// Keeps a cache entry's mapping in use; released on drop.
///
/// The guard gives up its share of the entry before it stops counting as a
/// reader, so once the count reaches zero the deleter holds the only
/// reference to the mapping.
pub struct MappedGuard {
    entry: ManuallyDrop<Arc<CacheEntry>>,
    readers: Arc<ReaderCount>,
}

impl MappedGuard {
    fn attach(entry: &Arc<CacheEntry>) -> Self {
        entry.readers.acquire();
        Self {
            entry: ManuallyDrop::new(Arc::clone(entry)),
            readers: Arc::clone(&entry.readers),
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.entry.map
    }

    pub(crate) fn size(&self) -> u64 {
        self.entry.size
    }

    pub(crate) fn modified(&self) -> DateTime<Utc> {
        self.entry.modified
    }
}

impl Drop for MappedGuard {
    fn drop(&mut self) {
        // SAFETY: `entry` is not touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.entry) };
        self.readers.release();
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<PasteId, Arc<CacheEntry>>,
    /// Ids claimed by writes still in flight.
    pending: HashSet<PasteId>,
}

pub struct MmapStore {
    layout: Layout,
    table: RwLock<Table>,
}

impl MmapStore {
    pub fn new(root: &Path) -> StorageResult<Self> {
        Ok(Self {
            layout: Layout::create(root)?,
            table: RwLock::new(Table::default()),
        })
    }

    /// Read handles currently attached to `id`, if it is cached.
    pub fn active_readers(&self, id: &PasteId) -> Option<usize> {
        self.table
            .read()
            .entries
            .get(id)
            .map(|entry| entry.readers.get())
    }

    fn write_and_map(&self, id: &PasteId, content: &[u8]) -> io::Result<CacheEntry> {
        let path = self.layout.write_new(id, content)?;
        CacheEntry::open(path.clone()).inspect_err(|_| {
            let _ = fs::remove_file(&path);
        })
    }
}

impl Store for MmapStore {
    #[instrument(skip(self, content), fields(backend = "fs-mmap", size = content.len()))]
    fn put(&self, content: Bytes) -> StorageResult<PasteId> {
        // Empty files cannot be mapped.
        if content.is_empty() {
            return Err(StorageError::EmptyPaste);
        }

        let id = {
            let mut table = self.table.write();
            let id =
                generate(|id| !table.entries.contains_key(id) && !table.pending.contains(id))?;
            table.pending.insert(id);
            id
        };

        let mapped = self.write_and_map(&id, &content);
        let mut table = self.table.write();
        table.pending.remove(&id);
        table.entries.insert(id, Arc::new(mapped?));
        Ok(id)
    }

    fn get(&self, id: &PasteId) -> StorageResult<Paste> {
        // Attach while holding the read lock so a concurrent delete either
        // sees this reader or prevents it from starting.
        let table = self.table.read();
        let entry = table.entries.get(id).ok_or(StorageError::NotFound(*id))?;
        Ok(Paste::from_mapped(MappedGuard::attach(entry)))
    }

    #[instrument(skip(self), fields(backend = "fs-mmap"))]
    fn delete(&self, id: &PasteId) -> StorageResult<u64> {
        let entry = self
            .table
            .write()
            .entries
            .remove(id)
            .ok_or(StorageError::NotFound(*id))?;

        entry.readers.wait_idle();
        let size = entry.size;
        let path = entry.path.clone();
        // Every guard released its reference before leaving the count, so
        // this unmaps before the file goes away.
        if Arc::into_inner(entry).is_none() {
            warn!(%id, "mapping still referenced after its readers finished");
        }

        // The paste is already unreachable, so a file that cannot be removed
        // is left for the next recovery instead of failing the delete.
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
            }
            Err(err) => warn!(%id, error = %err, "left orphaned paste file {}", path.display()),
        }
        Ok(size)
    }

    #[instrument(skip(self, visit), fields(backend = "fs-mmap", root = %self.layout.root().display()))]
    fn recover(
        &self,
        lifetime: Option<Duration>,
        visit: &mut RecoverVisitor<'_>,
    ) -> StorageResult<RecoveryStats> {
        self.layout.scan(lifetime, |file| {
            let entry = CacheEntry::open(file.path)?;
            self.table.write().entries.insert(file.id, Arc::new(entry));

            let visited = visit(RecoveredPaste {
                id: file.id,
                size: file.size,
                modified: file.modified,
                remaining: file.remaining,
            });
            if visited.is_err() {
                self.table.write().entries.remove(&file.id);
            }
            visited
        })
    }

    fn backend_name(&self) -> &'static str {
        "fs-mmap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Read, thread, time::Duration};

    #[test]
    fn reads_come_from_the_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = MmapStore::new(dir.path()).unwrap();
        let id = store.put(Bytes::from_static(b"mapped bytes")).unwrap();

        let paste = store.get(&id).unwrap();
        assert_eq!(paste.as_slice(), Some(&b"mapped bytes"[..]));
        let mut buf = [0u8; 5];
        assert_eq!(paste.read_at(&mut buf, 7).unwrap(), 5);
        assert_eq!(&buf, b"bytes");

        assert_eq!(store.active_readers(&id), Some(1));
        drop(paste);
        assert_eq!(store.active_readers(&id), Some(0));
    }

    #[test]
    fn rejects_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = MmapStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.put(Bytes::new()),
            Err(StorageError::EmptyPaste)
        ));
    }

    #[test]
    fn delete_unmaps_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MmapStore::new(dir.path()).unwrap();
        let id = store.put(Bytes::from_static(b"short lived")).unwrap();
        let path = dir.path().join(id.shard()).join(id.to_string());
        assert!(path.exists());

        assert_eq!(store.delete(&id).unwrap(), 11);
        assert!(!path.exists());
        assert!(matches!(store.get(&id), Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete(&id), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn delete_waits_for_in_flight_readers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MmapStore::new(dir.path()).unwrap());
        let content = vec![7u8; 256 * 1024];
        let id = store.put(Bytes::from(content.clone())).unwrap();
        let path = dir.path().join(id.shard()).join(id.to_string());

        let mut reader = store.get(&id).unwrap();
        let deleter = {
            let store = store.clone();
            thread::spawn(move || store.delete(&id))
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!deleter.is_finished(), "delete must wait for the reader");
        assert!(path.exists());
        // No new reader may attach once deletion has begun.
        assert!(matches!(store.get(&id), Err(StorageError::NotFound(_))));

        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, content);
        drop(reader);

        assert_eq!(deleter.join().unwrap().unwrap(), content.len() as u64);
        assert!(!path.exists());
    }

    #[test]
    fn mapping_is_released_before_delete_returns() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MmapStore::new(dir.path()).unwrap());
        let id = store.put(Bytes::from_static(b"unmap me")).unwrap();
        let entry = Arc::downgrade(&store.table.read().entries[&id]);

        let reader = store.get(&id).unwrap();
        let deleter = {
            let store = store.clone();
            thread::spawn(move || store.delete(&id))
        };
        thread::sleep(Duration::from_millis(100));
        assert!(entry.upgrade().is_some());
        drop(reader);

        assert_eq!(deleter.join().unwrap().unwrap(), 8);
        assert!(entry.upgrade().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unremovable_file_still_completes_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = MmapStore::new(dir.path()).unwrap();
        let id = store.put(Bytes::from_static(b"stuck")).unwrap();
        let path = dir.path().join(id.shard()).join(id.to_string());

        // A non-empty directory in its place makes unlink fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("child"), b"x").unwrap();

        assert_eq!(store.delete(&id).unwrap(), 5);
        assert!(matches!(store.get(&id), Err(StorageError::NotFound(_))));
        assert!(path.exists());
    }

    #[test]
    fn recover_maps_survivors_before_visiting() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = MmapStore::new(dir.path()).unwrap();
            store.put(Bytes::from_static(b"persisted")).unwrap()
        };

        let store = MmapStore::new(dir.path()).unwrap();
        assert!(store.get(&id).is_err());
        let mut visited = Vec::new();
        let stats = store
            .recover(None, &mut |paste| {
                // The mapping is already live when the visitor runs.
                assert!(store.active_readers(&paste.id).is_some());
                visited.push(paste.id);
                Ok(())
            })
            .unwrap();
        assert_eq!(stats.restored, 1);
        assert_eq!(visited, vec![id]);
        assert_eq!(
            store.get(&id).unwrap().as_slice(),
            Some(&b"persisted"[..])
        );
    }

    #[test]
    fn failed_visit_drops_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = MmapStore::new(dir.path()).unwrap();
            store.put(Bytes::from_static(b"over quota")).unwrap()
        };

        let store = MmapStore::new(dir.path()).unwrap();
        let result = store.recover(None, &mut |_| {
            Err(StorageError::QuotaExceeded(crate::storage::QuotaLimit::Bytes))
        });
        assert!(matches!(result, Err(StorageError::QuotaExceeded(_))));
        assert!(store.get(&id).is_err());
    }
}
