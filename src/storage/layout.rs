//! On-disk layout shared by the file-backed stores.
//!
//! Pastes live at `root/{shard}/{id}` where `shard` is the first two hex
//! characters of the id. The directory tree is the only index: a file's
//! modification time is its creation time across restarts.

use super::{RecoveryStats, StorageResult};
use crate::models::PasteId;
use chrono::{DateTime, Utc};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix of in-progress writes; such files never hold a live paste.
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

/// A persisted paste that passed the expiry and sanity checks.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub id: PasteId,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub remaining: Option<Duration>,
}

impl Layout {
    /// Use `root` as the storage root, creating it if needed.
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &PasteId) -> PathBuf {
        self.root.join(id.shard()).join(id.to_string())
    }

    /// Write a new paste file without ever exposing partial content.
    ///
    /// Bytes go to a temp file in the shard directory, are synced, then
    /// renamed into place. The temp file is removed on failure.
    pub fn write_new(&self, id: &PasteId, content: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(id);
        let shard_dir = self.root.join(id.shard());
        fs::create_dir_all(&shard_dir)?;

        let tmp_path = shard_dir.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
        let written = File::create(&tmp_path).and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|()| fs::rename(&tmp_path, &path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        Ok(path)
    }

    /// Parse the id of a paste file, checking it sits in its own shard.
    pub fn id_from_path(&self, path: &Path) -> Option<PasteId> {
        let id: PasteId = path.file_name()?.to_str()?.parse().ok()?;
        let shard_dir = path.parent()?;
        let in_shard = shard_dir.file_name()?.to_str()? == id.shard();
        (in_shard && shard_dir.parent()? == self.root.as_path()).then_some(id)
    }

    /// Walk the tree once at startup.
    ///
    /// Expired pastes, zero-byte files and leftover temp files are removed.
    /// Files that do not look like pastes are left alone. Every survivor is
    /// passed to `visit`; an error from `visit` stops the walk.
    pub fn scan(
        &self,
        lifetime: Option<Duration>,
        mut visit: impl FnMut(ScannedFile) -> StorageResult<()>,
    ) -> StorageResult<RecoveryStats> {
        let now = SystemTime::now();
        let mut stats = RecoveryStats::default();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                // file_type() does not follow symlinks, so links are skipped.
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let is_temp = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(TEMP_PREFIX));
                if is_temp {
                    warn!("removing interrupted write {}", path.display());
                    fs::remove_file(&path)?;
                    stats.discarded += 1;
                    continue;
                }

                let Some(id) = self.id_from_path(&path) else {
                    warn!("skipping unrecognized file {}", path.display());
                    stats.discarded += 1;
                    continue;
                };

                let metadata = entry.metadata()?;
                let modified = metadata.modified()?;
                let remaining = match lifetime {
                    None => None,
                    Some(lifetime) => match modified
                        .checked_add(lifetime)
                        .map_or(Ok(lifetime), |death| death.duration_since(now))
                    {
                        Ok(left) if !left.is_zero() => Some(left),
                        _ => {
                            debug!(%id, "removing expired paste");
                            fs::remove_file(&path)?;
                            stats.expired += 1;
                            continue;
                        }
                    },
                };

                if metadata.len() == 0 {
                    warn!(%id, "removing empty paste file {}", path.display());
                    fs::remove_file(&path)?;
                    stats.discarded += 1;
                    continue;
                }

                visit(ScannedFile {
                    id,
                    path,
                    size: metadata.len(),
                    modified: modified.into(),
                    remaining,
                })?;
                stats.restored += 1;
            }
        }

        Ok(stats)
    }
}
