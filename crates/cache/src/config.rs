//! Cache configuration and cache directory resolution

use crate::key::KeyLength;
use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "PKGCACHE_DIR";
/// Environment variable setting the key length in bytes
pub const KEY_BYTES_ENV: &str = "PKGCACHE_KEY_BYTES";
/// Environment variable disabling the directory watcher when set to `1` or `true`
pub const NO_WATCH_ENV: &str = "PKGCACHE_NO_WATCH";

/// Settings for opening a [`CacheStore`](crate::CacheStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Explicit cache directory; resolved from the environment when unset
    pub cache_dir: Option<PathBuf>,
    /// Digest bytes kept in each cache key
    pub key_length: KeyLength,
    /// Watch the cache directory instead of re-listing on every lookup
    pub watch: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            key_length: KeyLength::DEFAULT,
            watch: true,
        }
    }
}

impl CacheConfig {
    /// Read configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `PKGCACHE_KEY_BYTES` is not a valid
    /// key length.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key length is not a valid number
    /// of bytes.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let key_length = match var(KEY_BYTES_ENV) {
            Some(raw) => {
                let bytes = raw.trim().parse::<usize>().map_err(|e| {
                    Error::configuration(format!("{KEY_BYTES_ENV}={raw:?} is not a number: {e}"))
                })?;
                KeyLength::new(bytes)?
            }
            None => KeyLength::DEFAULT,
        };
        let watch = !var(NO_WATCH_ENV).is_some_and(|v| matches!(v.trim(), "1" | "true"));

        Ok(Self {
            cache_dir: var(CACHE_DIR_ENV).map(PathBuf::from),
            key_length,
            watch,
        })
    }

    /// The cache directory to use, creating it if necessary
    ///
    /// An explicit [`CacheConfig::cache_dir`] is used as given or not at
    /// all. Without one, the first writable default location wins:
    /// `$XDG_CACHE_HOME/pkgcache/downloads`, the platform cache directory,
    /// `~/.pkgcache/downloads`, then the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the explicit directory cannot be
    /// created or written to, or if no default location is writable.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        DirSources {
            explicit: self.cache_dir.clone(),
            xdg_cache_home: std::env::var_os("XDG_CACHE_HOME")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            platform_cache: cache_dir(),
            home: home_dir(),
            temp: std::env::temp_dir(),
        }
        .resolve()
    }
}

/// Where a cache directory may come from, most specific first
#[derive(Debug, Clone)]
struct DirSources {
    explicit: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    platform_cache: Option<PathBuf>,
    home: Option<PathBuf>,
    temp: PathBuf,
}

impl DirSources {
    fn resolve(self) -> Result<PathBuf> {
        if let Some(dir) = self.explicit.filter(|p| !p.as_os_str().is_empty()) {
            return match ensure_writable(&dir) {
                Ok(()) => Ok(dir),
                Err(e) => Err(Error::configuration(format!(
                    "cache directory {} is not usable: {e}",
                    dir.display()
                ))),
            };
        }

        let defaults = [
            self.xdg_cache_home.map(|d| d.join("pkgcache/downloads")),
            self.platform_cache.map(|d| d.join("pkgcache/downloads")),
            self.home.map(|d| d.join(".pkgcache/downloads")),
            Some(self.temp.join("pkgcache/downloads")),
        ];
        for dir in defaults.into_iter().flatten() {
            // Nix sandboxes point HOME at a directory that never exists
            if dir.starts_with("/homeless-shelter") {
                continue;
            }
            match ensure_writable(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "Cache directory candidate not usable");
                }
            }
        }
        Err(Error::configuration(
            "no writable cache directory found; set PKGCACHE_DIR",
        ))
    }
}

/// Create `dir` if needed and check that files can be created in it
///
/// The check file is a [`NamedTempFile`], removed again when it drops.
fn ensure_writable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    NamedTempFile::new_in(dir)?.close()
}
