//! URL-keyed download cache for package archives
//!
//! This crate keeps previously downloaded archives so a package manager does
//! not fetch them twice:
//! - Files are named after a truncated SHA-1 of their source URL
//! - An in-memory index of the cache directory is invalidated by a
//!   filesystem watcher, so external changes are picked up
//! - Stores and removes go through an atomic [`FileTransfer`]
//! - Cached zip archives are integrity-checked on demand and purged when
//!   corrupt
//! - Download directories of other registered environments are searched
//!   as a fallback and included in accounting
//!
//! # Example
//!
//! ```no_run
//! use pkgcache::{CacheStore, StoreMode};
//! use std::path::Path;
//! use url::Url;
//!
//! fn main() -> pkgcache::Result<()> {
//!     let cache = CacheStore::open("/var/cache/pkg")?;
//!     let url = Url::parse("https://example.com/mods/Foo-1.0.zip").expect("valid url");
//!
//!     if cache.find_valid_archive(&url)?.is_none() {
//!         cache.store(&url, Path::new("/tmp/Foo-1.0.zip"), None, StoreMode::Move)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
mod error;
pub mod index;
pub mod key;
pub mod legacy;
pub mod monitor;
pub mod store;
pub mod transfer;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use archive::{ArchiveCheck, check_archive};
pub use config::CacheConfig;
pub use key::{CacheFileName, CacheKey, KeyLength, hash_url, hash_url_with};
pub use legacy::{EnvironmentRecord, EnvironmentRegistry, resolve_legacy_dirs};
pub use store::{
    CacheEntry, CacheStore, CacheStoreBuilder, EvictionReport, MoveFromReport, RemoveAllReport,
    SizeInfo, StoreMode,
};
pub use transfer::{FileTransfer, FsTransfer};
