//! Zip archive integrity checks
//!
//! A check opens the archive and reads every entry to the end, which makes
//! the zip reader verify each entry's CRC-32. The first failure is reported
//! as a human-readable reason; malformed archives are a failed check, never
//! an error.

use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;

/// Outcome of an archive integrity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveCheck {
    /// Whether every entry passed
    pub ok: bool,
    /// Failure reason, empty when `ok`
    pub reason: String,
}

impl ArchiveCheck {
    fn passed() -> Self {
        Self {
            ok: true,
            reason: String::new(),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }
}

/// Run a full integrity scan over the zip archive at `path`
///
/// `None` reports `"Null file name"` without touching the filesystem.
#[must_use]
pub fn check_archive(path: Option<&Path>) -> ArchiveCheck {
    let Some(path) = path else {
        return ArchiveCheck::failed("Null file name");
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return ArchiveCheck::failed(format!("Error opening {}: {e}", path.display())),
    };
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(e) => return ArchiveCheck::failed(format!("Error in step EntryHeader: {e}")),
    };

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                return ArchiveCheck::failed(format!("Error in step EntryHeader for entry #{i}: {e}"));
            }
        };
        if let Err(e) = io::copy(&mut entry, &mut io::sink()) {
            return ArchiveCheck::failed(format!(
                "Error in step DataChecksum for {}: {e}",
                entry.name()
            ));
        }
    }

    tracing::debug!(path = %path.display(), entries = archive.len(), "Archive passed integrity check");
    ArchiveCheck::passed()
}
