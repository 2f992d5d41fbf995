//! Shared helpers for integration tests.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

#![allow(dead_code)]

use paste_store::{
    models::PasteId,
    services::paste_service::PasteService,
    storage::{Paste, QuotaLimits, StoreKind, open_store},
};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

pub const ALL_KINDS: [StoreKind; 3] = [StoreKind::File, StoreKind::Mapped, StoreKind::Memory];
pub const DISK_KINDS: [StoreKind; 2] = [StoreKind::File, StoreKind::Mapped];

/// Open a fresh service over `root`. Must run inside a Tokio runtime.
pub fn service(
    kind: StoreKind,
    root: &Path,
    limits: QuotaLimits,
    lifetime: Option<Duration>,
) -> PasteService {
    let store = open_store(kind, root).expect("failed to open store");
    PasteService::new(store, limits, lifetime)
}

pub fn unlimited() -> QuotaLimits {
    QuotaLimits::default()
}

pub fn read_all(mut paste: Paste) -> Vec<u8> {
    let mut out = Vec::new();
    paste.read_to_end(&mut out).expect("failed to read paste");
    out
}

pub fn paste_path(root: &Path, id: &PasteId) -> PathBuf {
    root.join(id.shard()).join(id.to_string())
}

/// Backdate a file's modification time by `age`.
pub fn age_file(path: &Path, age: Duration) {
    let file = File::options()
        .write(true)
        .open(path)
        .expect("failed to open paste file");
    file.set_modified(SystemTime::now() - age)
        .expect("failed to set modification time");
}
