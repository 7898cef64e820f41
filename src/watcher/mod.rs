//! The filesystem notification seam.
//!
//! Concrete backends deliver batches of `PendingChange` into the root's
//! event channel; everything above this seam is backend-agnostic.

mod fake;
mod notify_impl;

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::query::FileType;

pub use fake::{FakeWatcher, FakeWatcherHandle};
pub use notify_impl::NotifyWatcher;

/// One observed filesystem change, already stat'ed.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    pub exists: bool,
    pub meta: Option<ChangeMeta>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeMeta {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub file_type: FileType,
}

impl ChangeMeta {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let file_type = if meta.file_type().is_dir() {
            FileType::Dir
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else if meta.file_type().is_file() {
            FileType::Regular
        } else {
            FileType::Other
        };
        Self {
            size: meta.len(),
            mode: meta.mode(),
            mtime: meta.mtime(),
            file_type,
        }
    }
}

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("watcher backend error: {0}")]
    Backend(#[from] notify::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Watcher: Send {
    /// Begin delivering change batches. Idempotent start is not required;
    /// callers start a watcher exactly once.
    fn start(&mut self) -> Result<(), WatcherError>;

    /// Stop delivering changes. Dropping an unstarted watcher is fine.
    fn stop(&mut self);
}

/// Stat a path into a `PendingChange`, treating lookup failure as removal.
pub fn stat_change(path: &Path) -> PendingChange {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => PendingChange {
            path: path.to_path_buf(),
            exists: true,
            meta: Some(ChangeMeta::from_metadata(&meta)),
        },
        Err(_) => PendingChange {
            path: path.to_path_buf(),
            exists: false,
            meta: None,
        },
    }
}

/// Walk an existing tree, producing the synthetic change batch used to seed
/// a new root's view.
pub fn scan_tree(root: &Path) -> std::io::Result<Vec<PendingChange>> {
    let mut changes = Vec::new();
    scan_into(root, &mut changes)?;
    Ok(changes)
}

fn scan_into(dir: &Path, out: &mut Vec<PendingChange>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            // Raced with a deletion during the crawl.
            Err(_) => continue,
        };
        let is_dir = meta.file_type().is_dir();
        out.push(PendingChange {
            path: path.clone(),
            exists: true,
            meta: Some(ChangeMeta::from_metadata(&meta)),
        });
        if is_dir {
            scan_into(&path, out)?;
        }
    }
    Ok(())
}
