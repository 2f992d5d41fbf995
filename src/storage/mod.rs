//! Storage core: identifier generation, quota accounting and the three
//! interchangeable paste backends.
//!
//! Every backend implements [`Store`]. Backends never touch the quota
//! themselves; [`crate::services::paste_service::PasteService`] composes a
//! backend with a [`QuotaTracker`] and the deletion scheduler.

pub mod file;
pub mod id;
pub mod layout;
pub mod memory;
pub mod mmap;
pub mod paste;
pub mod quota;

use crate::models::PasteId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use std::{fmt, io, path::Path, sync::Arc, time::Duration};
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use mmap::MmapStore;
pub use paste::{ByteStream, Paste};
pub use quota::{QuotaLimits, QuotaReport, QuotaTracker};

/// Which ceiling rejected a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Count,
    Bytes,
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaLimit::Count => f.write_str("reached maximum number of pastes"),
            QuotaLimit::Bytes => f.write_str("reached maximum storage size"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("paste {0} not found")]
    NotFound(PasteId),
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(QuotaLimit),
    #[error("no free paste id found after {attempts} attempts")]
    IdSpaceExhausted { attempts: usize },
    #[error(transparent)]
    InvalidId(#[from] crate::models::ParseIdError),
    #[error("no paste provided")]
    EmptyPaste,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A persisted paste that survived the recovery scan.
#[derive(Debug, Clone, Copy)]
pub struct RecoveredPaste {
    pub id: PasteId,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Lifetime left, or `None` when expiry is disabled.
    pub remaining: Option<Duration>,
}

/// Outcome of a recovery walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub restored: usize,
    pub expired: usize,
    pub discarded: usize,
}

/// Callback receiving each paste restored by [`Store::recover`].
pub type RecoverVisitor<'a> = dyn FnMut(RecoveredPaste) -> StorageResult<()> + 'a;

/// Capability shared by all paste backends.
///
/// Calls are synchronous and may block on disk I/O; async callers should
/// move them onto a blocking thread.
pub trait Store: Send + Sync + 'static {
    /// Persist `content` under a fresh id.
    fn put(&self, content: Bytes) -> StorageResult<PasteId>;

    /// Open a read handle for a live paste.
    fn get(&self, id: &PasteId) -> StorageResult<Paste>;

    /// Remove a paste, returning the number of bytes it occupied.
    fn delete(&self, id: &PasteId) -> StorageResult<u64>;

    /// Rebuild live state from persisted data. Must run once, before any
    /// other call. Expired and corrupt entries are removed; every survivor
    /// is handed to `visit`, and an error from `visit` aborts the walk.
    fn recover(
        &self,
        lifetime: Option<Duration>,
        visit: &mut RecoverVisitor<'_>,
    ) -> StorageResult<RecoveryStats>;

    fn backend_name(&self) -> &'static str;
}

/// Backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Plain files in a sharded directory tree.
    #[value(name = "fs")]
    File,
    /// Files kept memory-mapped for zero-copy reads.
    #[value(name = "fs-mmap")]
    Mapped,
    /// Process memory only; nothing survives a restart.
    #[value(name = "mem")]
    Memory,
}

/// Construct the backend for `kind`, creating `root` for file-backed kinds.
pub fn open_store(kind: StoreKind, root: &Path) -> StorageResult<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match kind {
        StoreKind::File => Arc::new(FileStore::new(root)?),
        StoreKind::Mapped => Arc::new(MmapStore::new(root)?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
