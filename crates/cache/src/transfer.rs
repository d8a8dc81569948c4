//! All-or-nothing file transfers
//!
//! The cache never writes into its directory directly. Every move, copy and
//! delete goes through a [`FileTransfer`], which must leave the filesystem
//! either fully updated or untouched. [`FsTransfer`] provides this with
//! temporary files and renames inside the destination directory.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::Path;

/// Atomic move, copy and delete
pub trait FileTransfer: Send + Sync {
    /// Relocate `src` to `dst`; `src` no longer exists afterwards
    ///
    /// # Errors
    ///
    /// Returns an I/O error and leaves both paths untouched on failure.
    fn move_file(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Copy `src` to `dst`, replacing `dst` only when `overwrite` is set
    ///
    /// # Errors
    ///
    /// Returns an I/O error and never leaves a partially written `dst`.
    fn copy_file(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()>;

    /// Delete `path`; deleting a file that is already gone succeeds
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists and cannot be removed.
    fn delete_file(&self, path: &Path) -> Result<()>;
}

/// [`FileTransfer`] backed by the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTransfer;

impl FsTransfer {
    /// Write `src` into a temp file beside `dst`, then rename it into place
    fn stage_copy(src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        let parent = dst
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut reader = File::open(src).map_err(|e| Error::io(e, src, "copy"))?;
        let mut staged =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(e, parent, "copy"))?;
        io::copy(&mut reader, staged.as_file_mut()).map_err(|e| Error::io(e, dst, "copy"))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(e, dst, "copy"))?;

        // Dropping the temp file on any error removes it
        let persisted = if overwrite {
            staged.persist(dst)
        } else {
            staged.persist_noclobber(dst)
        };
        persisted.map_err(|e| Error::io(e.error, dst, "copy"))?;
        Ok(())
    }
}

impl FileTransfer for FsTransfer {
    fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                tracing::debug!(
                    src = %src.display(),
                    dst = %dst.display(),
                    "Rename crosses filesystems, copying instead"
                );
                Self::stage_copy(src, dst, true)?;
                if let Err(e) = fs::remove_file(src) {
                    // Roll back so the move either happened or did not
                    let _ = fs::remove_file(dst);
                    return Err(Error::io(e, src, "move"));
                }
                Ok(())
            }
            Err(e) => Err(Error::io(e, src, "move")),
        }
    }

    fn copy_file(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if !overwrite && dst.exists() {
            return Err(Error::io(
                io::Error::new(ErrorKind::AlreadyExists, "destination exists"),
                dst,
                "copy",
            ));
        }
        Self::stage_copy(src, dst, overwrite)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, path, "delete")),
        }
    }
}
