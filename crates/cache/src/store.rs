//! URL-keyed download cache
//!
//! [`CacheStore`] owns one primary directory of files named
//! `<key>-<description>`. Lookups consult an in-memory [`CacheIndex`] of that
//! directory, kept fresh by a [`DirectoryChangeMonitor`], and fall back to
//! the legacy directories of registered environments. Every write goes
//! through a [`FileTransfer`] so an interrupted store or remove leaves
//! either the old state or the new one.

use crate::archive::check_archive;
use crate::config::CacheConfig;
use crate::index::{CacheIndex, list_file_names};
use crate::key::{CacheFileName, CacheKey, KeyLength, hash_url_with};
use crate::legacy::{EnvironmentRegistry, resolve_legacy_dirs};
use crate::monitor::DirectoryChangeMonitor;
use crate::transfer::{FileTransfer, FsTransfer};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use url::Url;

/// How [`CacheStore::store`] brings a file into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Copy the file, leaving the source in place
    #[default]
    Copy,
    /// Move the file; the source no longer exists afterwards
    Move,
}

/// File count and total size of everything the cache can see
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeInfo {
    /// Number of files
    pub file_count: usize,
    /// Sum of file lengths in bytes
    pub total_bytes: u64,
}

/// A file found in the primary or a legacy directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Full path to the file
    pub path: PathBuf,
    /// Length in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Outcome of [`CacheStore::remove_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoveAllReport {
    /// Files deleted
    pub removed: usize,
    /// Files that could not be deleted
    pub failed: usize,
}

/// Outcome of [`CacheStore::move_from`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MoveFromReport {
    /// Files moved into the cache
    pub moved: usize,
    /// Source files deleted because the cache already had them
    pub discarded: usize,
}

/// Outcome of [`CacheStore::enforce_size_limit`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Files deleted
    pub evicted: usize,
    /// Bytes released
    pub bytes_freed: u64,
}

/// Builder for [`CacheStore`]
pub struct CacheStoreBuilder {
    dir: PathBuf,
    key_length: KeyLength,
    watch: bool,
    registry: Option<Weak<dyn EnvironmentRegistry>>,
    transfer: Arc<dyn FileTransfer>,
}

impl CacheStoreBuilder {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            key_length: KeyLength::DEFAULT,
            watch: true,
            registry: None,
            transfer: Arc::new(FsTransfer),
        }
    }

    /// Digest bytes kept in each cache key
    #[must_use]
    pub fn key_length(mut self, key_length: KeyLength) -> Self {
        self.key_length = key_length;
        self
    }

    /// Watch the directory for external changes (default on)
    ///
    /// Without a watcher every lookup lists the directory afresh.
    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Consult the legacy directories of `registry`'s environments
    ///
    /// Only a weak reference is kept: once the registry is dropped, legacy
    /// lookups are skipped.
    #[must_use]
    pub fn registry<R>(mut self, registry: &Arc<R>) -> Self
    where
        R: EnvironmentRegistry + 'static,
    {
        let registry: Arc<dyn EnvironmentRegistry> = registry.clone();
        self.registry = Some(Arc::downgrade(&registry));
        self
    }

    /// Route moves, copies and deletes through `transfer`
    #[must_use]
    pub fn transfer<T>(mut self, transfer: T) -> Self
    where
        T: FileTransfer + 'static,
    {
        self.transfer = Arc::new(transfer);
        self
    }

    /// Open the cache
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDirectory`] if the directory does not exist.
    /// A watcher that fails to start is not an error: the cache logs a
    /// warning and re-lists its directory on every lookup instead.
    pub fn open(self) -> Result<CacheStore> {
        if !self.dir.is_dir() {
            return Err(Error::missing_directory(&self.dir));
        }

        let index = Arc::new(CacheIndex::new(&self.dir));
        let monitor = if self.watch {
            match DirectoryChangeMonitor::start(Arc::clone(&index)) {
                Ok(monitor) => Some(monitor),
                Err(e) => {
                    tracing::warn!(
                        dir = %self.dir.display(),
                        error = %e,
                        "Cache directory watcher unavailable, index will not be cached"
                    );
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(dir = %self.dir.display(), watched = monitor.is_some(), "Opened download cache");
        Ok(CacheStore {
            dir: self.dir,
            key_length: self.key_length,
            index,
            _monitor: monitor,
            registry: self.registry,
            transfer: self.transfer,
        })
    }
}

/// Download cache keyed by source URL
pub struct CacheStore {
    dir: PathBuf,
    key_length: KeyLength,
    index: Arc<CacheIndex>,
    _monitor: Option<DirectoryChangeMonitor>,
    registry: Option<Weak<dyn EnvironmentRegistry>>,
    transfer: Arc<dyn FileTransfer>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("dir", &self.dir)
            .field("key_length", &self.key_length)
            .field("watched", &self.index.is_watched())
            .field("has_registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Start configuring a cache over `dir`
    #[must_use]
    pub fn builder(dir: impl Into<PathBuf>) -> CacheStoreBuilder {
        CacheStoreBuilder::new(dir.into())
    }

    /// Open a cache over `dir` with default settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDirectory`] if the directory does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(dir).open()
    }

    /// Open a cache as described by `config`, resolving its directory
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no usable directory can be found.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let dir = config.resolve_cache_dir()?;
        Self::builder(dir)
            .key_length(config.key_length)
            .watch(config.watch)
            .open()
    }

    /// The primary cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Key under which `url` is cached
    #[must_use]
    pub fn key_for(&self, url: &Url) -> CacheKey {
        hash_url_with(url, self.key_length)
    }

    /// Legacy directories currently in effect, excluding the primary one
    #[must_use]
    pub fn legacy_dirs(&self) -> BTreeSet<PathBuf> {
        let registry = self.registry.as_ref().and_then(Weak::upgrade);
        let mut dirs = resolve_legacy_dirs(registry.as_deref());
        dirs.retain(|dir| !same_dir(dir, &self.dir));
        dirs
    }

    /// Path of the cached file for `url`, if any
    ///
    /// With a `remote_timestamp`, a cached file last modified at or before
    /// that time is stale: it is deleted and the scan continues. The primary
    /// directory is searched first, then each legacy directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the primary directory cannot be listed or a
    /// stale file cannot be deleted. Absence is `Ok(None)`.
    pub fn find_file(
        &self,
        url: &Url,
        remote_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Option<PathBuf>> {
        let key = self.key_for(url);

        let snapshot = self.index.snapshot()?;
        let mut dirty = false;
        let found = self.scan(
            &self.dir,
            snapshot.matching(key.as_str()),
            remote_timestamp,
            &mut dirty,
        );
        if dirty {
            self.index.invalidate();
        }
        if let Some(path) = found? {
            tracing::debug!(%url, path = %path.display(), "Cache hit");
            return Ok(Some(path));
        }

        for dir in self.legacy_dirs() {
            let mut names = match list_file_names(&dir) {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable legacy cache directory");
                    continue;
                }
            };
            names.sort();
            let matches = names
                .iter()
                .map(OsString::as_os_str)
                .filter(|name| key.matches(name));
            if let Some(path) = self.scan(&dir, matches, remote_timestamp, &mut dirty)? {
                tracing::debug!(%url, path = %path.display(), "Cache hit in legacy directory");
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Check candidate names in `dir`, evicting stale ones
    ///
    /// Sets `dirty` when a file was deleted or had already disappeared. A
    /// name that cannot be stat'ed is logged and passed over.
    fn scan<'a>(
        &self,
        dir: &Path,
        names: impl Iterator<Item = &'a OsStr>,
        remote_timestamp: Option<DateTime<Utc>>,
        dirty: &mut bool,
    ) -> Result<Option<PathBuf>> {
        for name in names {
            let path = dir.join(name);
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    *dirty = true;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            };

            let Some(remote) = remote_timestamp else {
                return Ok(Some(path));
            };
            let modified: DateTime<Utc> = metadata
                .modified()
                .map_err(|e| Error::io(e, &path, "metadata"))?
                .into();
            if remote < modified {
                return Ok(Some(path));
            }

            tracing::info!(
                path = %path.display(),
                %modified,
                %remote,
                "Evicting stale cache entry"
            );
            self.transfer.delete_file(&path)?;
            *dirty = true;
        }
        Ok(None)
    }

    /// Path of a cached archive for `url` that passes an integrity check
    ///
    /// A cached file that fails the check is deleted and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if listing fails or a corrupt file cannot be
    /// deleted.
    pub fn find_valid_archive(&self, url: &Url) -> Result<Option<PathBuf>> {
        let Some(path) = self.find_file(url, None)? else {
            return Ok(None);
        };

        let check = check_archive(Some(&path));
        if check.ok {
            return Ok(Some(path));
        }

        tracing::warn!(
            %url,
            path = %path.display(),
            reason = %check.reason,
            "Purging corrupt cached archive"
        );
        self.transfer.delete_file(&path)?;
        self.index.invalidate();
        Ok(None)
    }

    /// Whether anything is cached for `url`
    ///
    /// Listing failures are logged and reported as not cached.
    #[must_use]
    pub fn is_cached(&self, url: &Url) -> bool {
        match self.find_file(url, None) {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(%url, error = %e, "Cache lookup failed");
                false
            }
        }
    }

    /// Whether an archive for `url` is probably cached
    ///
    /// Only filenames are consulted: the primary directory through the
    /// index, then each legacy directory's listing. Nothing is stat'ed or
    /// opened, so a corrupt or vanished file may still count. Use
    /// [`CacheStore::find_valid_archive`] before relying on the contents.
    #[must_use]
    pub fn is_probably_cached_archive(&self, url: &Url) -> bool {
        let key = self.key_for(url);
        match self.index.snapshot() {
            Ok(snapshot) if snapshot.matching(key.as_str()).next().is_some() => return true,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%url, error = %e, "Cache lookup failed");
                return false;
            }
        }

        self.legacy_dirs().iter().any(|dir| match list_file_names(dir) {
            Ok(names) => names.iter().any(|name| key.matches(name)),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable legacy cache directory");
                false
            }
        })
    }

    /// Put `source` into the cache as the file for `url`
    ///
    /// Any file already cached for `url` is removed first, so a URL maps to
    /// at most one file. Without a `description`, the source's file name is
    /// used. Returns the path of the cached file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the transfer fails; the cache directory then
    /// holds no partial file for `url`.
    pub fn store(
        &self,
        url: &Url,
        source: &Path,
        description: Option<&str>,
        mode: StoreMode,
    ) -> Result<PathBuf> {
        self.remove(url)?;

        let key = self.key_for(url);
        let description = description.map_or_else(
            || {
                source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
            str::to_owned,
        );
        let file_name = CacheFileName::new(&key, &description);
        let target = self.dir.join(file_name.as_str());

        match mode {
            StoreMode::Move => self.transfer.move_file(source, &target)?,
            StoreMode::Copy => self.transfer.copy_file(source, &target, true)?,
        }
        self.index.invalidate();

        tracing::info!(%url, path = %target.display(), ?mode, "Stored file in cache");
        Ok(target)
    }

    /// Remove the cached file for `url`
    ///
    /// Returns `false` if nothing was cached.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be deleted.
    pub fn remove(&self, url: &Url) -> Result<bool> {
        let Some(path) = self.find_file(url, None)? else {
            return Ok(false);
        };
        self.transfer.delete_file(&path)?;
        self.index.invalidate();
        tracing::info!(%url, path = %path.display(), "Removed cached file");
        Ok(true)
    }

    /// Delete every file in the primary and legacy directories
    ///
    /// Best effort: a file that cannot be deleted, or a directory that
    /// cannot be listed, is counted in [`RemoveAllReport::failed`] and the
    /// rest are still removed.
    pub fn remove_all(&self) -> RemoveAllReport {
        let mut report = RemoveAllReport::default();

        let dirs = std::iter::once(self.dir.clone()).chain(self.legacy_dirs());
        for dir in dirs {
            let names = match list_file_names(&dir) {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Could not list cache directory");
                    report.failed += 1;
                    continue;
                }
            };
            for name in names {
                let path = dir.join(name);
                match self.transfer.delete_file(&path) {
                    Ok(()) => report.removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Could not delete cached file");
                        report.failed += 1;
                    }
                }
            }
        }

        self.index.invalidate();
        tracing::info!(removed = report.removed, failed = report.failed, "Cleared download cache");
        report
    }

    /// Consolidate the files of `source_dir` into the primary directory
    ///
    /// A file whose name already exists in the cache is a duplicate and is
    /// deleted from `source_dir`; every other file is moved. Nothing happens
    /// if `source_dir` is missing or is the cache directory itself.
    ///
    /// # Errors
    ///
    /// Returns the first transfer error. Files handled before it stay
    /// handled.
    pub fn move_from(&self, source_dir: &Path) -> Result<MoveFromReport> {
        let mut report = MoveFromReport::default();
        if !source_dir.is_dir() || same_dir(source_dir, &self.dir) {
            return Ok(report);
        }

        let outcome = self.move_entries(source_dir, &mut report);
        if report.moved > 0 {
            self.index.invalidate();
        }
        outcome?;

        tracing::info!(
            source = %source_dir.display(),
            moved = report.moved,
            discarded = report.discarded,
            "Moved files into download cache"
        );
        Ok(report)
    }

    fn move_entries(&self, source_dir: &Path, report: &mut MoveFromReport) -> Result<()> {
        for name in list_file_names(source_dir)? {
            let src = source_dir.join(&name);
            let dst = self.dir.join(&name);
            if fs::symlink_metadata(&dst).is_ok() {
                self.transfer.delete_file(&src)?;
                report.discarded += 1;
            } else {
                self.transfer.move_file(&src, &dst)?;
                report.moved += 1;
            }
        }
        Ok(())
    }

    /// Every file in the primary and legacy directories
    ///
    /// Always a fresh listing; the index is not used.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the primary directory cannot be listed.
    /// Unreadable legacy directories are skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = dir_entries(&self.dir)?;
        for dir in self.legacy_dirs() {
            match dir_entries(&dir) {
                Ok(more) => entries.extend(more),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable legacy cache directory");
                }
            }
        }
        Ok(entries)
    }

    /// Count and total size of every file the cache can see
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the primary directory cannot be listed.
    pub fn size_info(&self) -> Result<SizeInfo> {
        Ok(self
            .entries()?
            .iter()
            .fold(SizeInfo::default(), |acc, entry| SizeInfo {
                file_count: acc.file_count + 1,
                total_bytes: acc.total_bytes + entry.size,
            }))
    }

    /// Delete the least recently modified files of the primary directory
    /// until it holds at most `max_bytes`
    ///
    /// Legacy directories are not touched.
    ///
    /// # Errors
    ///
    /// Returns the first listing or delete error. Files deleted before it
    /// stay deleted.
    pub fn enforce_size_limit(&self, max_bytes: u64) -> Result<EvictionReport> {
        let mut entries = dir_entries(&self.dir)?;
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut report = EvictionReport::default();
        let mut outcome = Ok(());
        for entry in entries {
            if total <= max_bytes {
                break;
            }
            if let Err(e) = self.transfer.delete_file(&entry.path) {
                outcome = Err(e);
                break;
            }
            total -= entry.size;
            report.evicted += 1;
            report.bytes_freed += entry.size;
        }

        if report.evicted > 0 {
            self.index.invalidate();
            tracing::info!(
                evicted = report.evicted,
                bytes_freed = report.bytes_freed,
                max_bytes,
                "Trimmed download cache"
            );
        }
        outcome.map(|()| report)
    }
}

/// Stat every file in `dir`
///
/// Files that vanish meanwhile are skipped silently; entries that cannot be
/// stat'ed, such as a symlink loop, are logged and skipped.
fn dir_entries(dir: &Path) -> Result<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    for name in list_file_names(dir)? {
        let path = dir.join(name);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry");
                continue;
            }
        };
        let modified = metadata
            .modified()
            .map_err(|e| Error::io(e, &path, "metadata"))?;
        entries.push(CacheEntry {
            path,
            size: metadata.len(),
            modified: modified.into(),
        });
    }
    Ok(entries)
}

/// Whether two paths name the same directory
fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
