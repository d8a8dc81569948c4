//! Legacy download directories owned by other environments
//!
//! A package manager may manage several environments, each of which used to
//! keep its own download directory. Those directories are still consulted
//! on lookup, counted by size accounting and cleared by `remove_all`, but
//! the cache never writes new entries into them.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// One environment known to the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRecord {
    /// Whether the environment is currently usable
    pub valid: bool,
    /// Download directory the environment used before the shared cache
    pub legacy_cache_dir: Option<PathBuf>,
}

impl EnvironmentRecord {
    /// A valid environment with a legacy directory
    #[must_use]
    pub fn new(legacy_cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            valid: true,
            legacy_cache_dir: Some(legacy_cache_dir.into()),
        }
    }
}

/// Source of environment records, queried on every legacy lookup
///
/// Registrations can change at any time, so implementations should report
/// the current set rather than a cached one.
pub trait EnvironmentRegistry: Send + Sync {
    /// Environments currently registered
    fn environments(&self) -> Vec<EnvironmentRecord>;
}

impl EnvironmentRegistry for Vec<EnvironmentRecord> {
    fn environments(&self) -> Vec<EnvironmentRecord> {
        self.clone()
    }
}

/// Legacy directories of valid environments that exist right now
///
/// The result is deduplicated and ordered, so scans over it are
/// deterministic. Without a registry the set is empty.
#[must_use]
pub fn resolve_legacy_dirs(registry: Option<&dyn EnvironmentRegistry>) -> BTreeSet<PathBuf> {
    let Some(registry) = registry else {
        return BTreeSet::new();
    };
    registry
        .environments()
        .into_iter()
        .filter(|env| env.valid)
        .filter_map(|env| env.legacy_cache_dir)
        .filter(|dir| dir.is_dir())
        .collect()
}
