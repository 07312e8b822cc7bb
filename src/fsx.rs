//! Filesystem wrapper.
//!
//! Thin helpers over `std::fs` that attach the offending path to every error
//! and refuse symlinks, which the archive format cannot represent. The rest of
//! the crate imports `crate::fsx` instead of touching `std::fs` directly.

use std::fs::{self, File, Metadata};
use std::path::Path;

use crate::error::{CarError, Result};

/// Metadata of `path` without following symlinks.
pub fn metadata(path: &Path) -> Result<Metadata> {
    fs::symlink_metadata(path).map_err(|e| CarError::io(e, path))
}

/// Byte length of a regular file. Symlinks and other special files are rejected.
pub fn regular_file_len(path: &Path) -> Result<u64> {
    let meta = metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(CarError::Unsupported(format!("symlink '{}'", path.display())));
    }
    if !meta.is_file() {
        return Err(CarError::Unsupported(format!("'{}' is not a regular file", path.display())));
    }
    Ok(meta.len())
}

pub fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| CarError::io(e, path))
}

pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| CarError::io(e, path))
}
