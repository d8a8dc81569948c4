//! In-memory index of the primary cache directory
//!
//! The index holds at most one [`Snapshot`], an immutable sorted listing of
//! filenames. Invalidation drops the snapshot; the next lookup re-lists the
//! directory and publishes a fresh one. Readers clone the `Arc` and release
//! the lock immediately, so no lock is ever held across directory I/O and a
//! reader holding an old snapshot keeps a self-consistent view.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use walkdir::{DirEntry, WalkDir};

/// Immutable listing of the files in one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    names: Vec<OsString>,
}

impl Snapshot {
    /// Build a snapshot from filenames, sorting them for a stable scan order
    #[must_use]
    pub fn new(mut names: Vec<OsString>) -> Self {
        names.sort();
        Self { names }
    }

    /// List `dir` and capture its files
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be opened.
    pub fn capture(dir: &Path) -> Result<Self> {
        Ok(Self::new(list_file_names(dir)?))
    }

    /// Filenames starting with `prefix`, in snapshot order
    ///
    /// Names are compared byte-wise, so a name that is not valid UTF-8
    /// still matches when its key prefix does.
    pub fn matching<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a OsStr> + 'a {
        self.names
            .iter()
            .map(OsString::as_os_str)
            .filter(move |name| name.as_encoded_bytes().starts_with(prefix.as_bytes()))
    }

    /// Number of files captured
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the directory was empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Names of the non-directory entries directly inside `dir`
///
/// Only a failure to open `dir` itself is an error. An entry that cannot be
/// read is logged and left out. Symlinks are listed unless they resolve to a
/// directory; a dangling link is still a name that removal must see.
pub(crate) fn list_file_names(dir: &Path) -> Result<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(Error::io(e.into(), dir, "read_dir")),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if is_directory(&entry) {
            continue;
        }
        names.push(entry.file_name().to_os_string());
    }
    Ok(names)
}

fn is_directory(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() || (entry.path_is_symlink() && entry.path().is_dir())
}

/// Lazily rebuilt snapshot of the primary cache directory
#[derive(Debug)]
pub struct CacheIndex {
    dir: PathBuf,
    current: RwLock<Option<Arc<Snapshot>>>,
    generation: AtomicU64,
    watched: AtomicBool,
}

impl CacheIndex {
    /// Create an empty (invalid) index over `dir`
    ///
    /// The index starts unwatched: until [`CacheIndex::set_watched`] is
    /// called, every lookup re-lists the directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            watched: AtomicBool::new(false),
        }
    }

    /// Directory this index lists
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mark whether a change monitor is feeding invalidations to this index
    ///
    /// An unwatched index never publishes snapshots, since nothing would
    /// tell it when they go stale.
    pub fn set_watched(&self, watched: bool) {
        self.watched.store(watched, Ordering::Release);
        if !watched {
            self.invalidate();
        }
    }

    /// Whether snapshots are being cached
    #[must_use]
    pub fn is_watched(&self) -> bool {
        self.watched.load(Ordering::Acquire)
    }

    /// Drop the current snapshot
    pub fn invalidate(&self) {
        let mut current = self.current.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if current.take().is_some() {
            tracing::debug!(dir = %self.dir.display(), "Cache index invalidated");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_valid(&self) -> bool {
        self.current.read().is_some()
    }

    /// Current snapshot, re-listing the directory if there is none
    ///
    /// A rebuilt snapshot is published only if no invalidation happened
    /// while the directory was being listed; otherwise it is handed to this
    /// caller alone and the next lookup lists again.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.snapshot_then(|| ())
    }

    /// [`CacheIndex::snapshot`], running `after_listing` between the
    /// directory listing and the publish step
    fn snapshot_then(&self, after_listing: impl FnOnce()) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current.read().as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let started_at = self.generation.load(Ordering::Acquire);
        let snapshot = Arc::new(Snapshot::capture(&self.dir)?);
        after_listing();

        if self.is_watched() {
            let mut current = self.current.write();
            if self.generation.load(Ordering::Acquire) == started_at {
                *current = Some(Arc::clone(&snapshot));
                tracing::debug!(
                    dir = %self.dir.display(),
                    files = snapshot.len(),
                    "Cache index rebuilt"
                );
            }
        }
        Ok(snapshot)
    }
}
