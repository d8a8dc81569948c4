//! Filesystem change monitor for the primary cache directory

use crate::index::CacheIndex;
use crate::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;

/// Watches a directory and invalidates a [`CacheIndex`] on every change
///
/// The watcher callback runs on the backend's own thread. Dropping the
/// monitor stops watching.
pub struct DirectoryChangeMonitor {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for DirectoryChangeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryChangeMonitor")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Whether an event can change the set of files in the directory
fn is_change(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

impl DirectoryChangeMonitor {
    /// Start watching the index's directory
    ///
    /// Marks the index as watched once the watcher is installed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Watch`] if the platform watcher cannot be created
    /// or cannot watch the directory.
    pub fn start(index: Arc<CacheIndex>) -> Result<Self> {
        let dir = index.dir().to_path_buf();
        let target = Arc::clone(&index);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if is_change(&event.kind) => target.invalidate(),
                Ok(_) => {}
                Err(e) => {
                    // Missed events are possible, so distrust the snapshot
                    tracing::warn!(error = %e, "Cache directory watcher reported an error");
                    target.invalidate();
                }
            }
        })
        .map_err(|e| Error::watch(e, &dir))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::watch(e, &dir))?;

        index.set_watched(true);
        tracing::debug!(dir = %dir.display(), "Watching cache directory");
        Ok(Self {
            dir,
            _watcher: watcher,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn access_events_are_ignored() {
        use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind, RenameMode};
        assert!(!is_change(&EventKind::Access(AccessKind::Any)));
        assert!(is_change(&EventKind::Create(CreateKind::File)));
        assert!(is_change(&EventKind::Remove(RemoveKind::File)));
        assert!(is_change(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))));
        assert!(is_change(&EventKind::Any));
    }

    #[test]
    fn external_create_invalidates_index() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(CacheIndex::new(tmp.path()));
        let _monitor = DirectoryChangeMonitor::start(Arc::clone(&index)).unwrap();
        assert!(index.is_watched());

        assert!(index.snapshot().unwrap().is_empty());
        std::fs::write(tmp.path().join("ABCD1234-a.zip"), b"x").unwrap();

        assert!(wait_for(|| index.snapshot().unwrap().len() == 1));
    }

    #[test]
    fn watching_a_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(CacheIndex::new(tmp.path().join("missing")));
        let err = DirectoryChangeMonitor::start(Arc::clone(&index)).unwrap_err();
        assert!(matches!(err, Error::Watch { .. }));
        assert!(!index.is_watched());
    }
}
