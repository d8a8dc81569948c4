//! Error types for the download cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while listing, transferring or deleting cache files
    #[error("I/O {operation} failed: {}", path.display())]
    #[diagnostic(
        code(pkgcache::io),
        help("Check file permissions and available disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error
        path: Box<Path>,
        /// Operation that failed (e.g., "move", "copy", "delete")
        operation: String,
    },

    /// The primary cache directory does not exist
    #[error("Cache directory does not exist: {}", path.display())]
    #[diagnostic(
        code(pkgcache::missing_directory),
        help("Create the directory before opening the cache")
    )]
    MissingDirectory {
        /// The directory that was expected
        path: Box<Path>,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(pkgcache::configuration))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The filesystem watcher could not be started
    #[error("Failed to watch {}", path.display())]
    #[diagnostic(code(pkgcache::watch))]
    Watch {
        /// The underlying watcher error
        #[source]
        source: notify::Error,
        /// Directory that was being watched
        path: Box<Path>,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: path.as_ref().into(),
            operation: operation.into(),
        }
    }

    /// Create a missing directory error
    #[must_use]
    pub fn missing_directory(path: impl AsRef<Path>) -> Self {
        Self::MissingDirectory {
            path: path.as_ref().into(),
        }
    }

    /// Create a watcher error
    #[must_use]
    pub fn watch(source: notify::Error, path: impl AsRef<Path>) -> Self {
        Self::Watch {
            source,
            path: path.as_ref().into(),
        }
    }

    /// Whether this is an I/O error whose cause is a missing file
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display_includes_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/var/cache/pkg/abcd1234-a.zip",
            "delete",
        );
        assert_eq!(
            err.to_string(),
            "I/O delete failed: /var/cache/pkg/abcd1234-a.zip"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_io_error_is_recognised() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/var/cache/pkg",
            "read_dir",
        );
        assert_eq!(err.to_string(), "I/O read_dir failed: /var/cache/pkg");
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_directory_display() {
        let err = Error::missing_directory("/nope");
        assert_eq!(err.to_string(), "Cache directory does not exist: /nope");
    }
}
