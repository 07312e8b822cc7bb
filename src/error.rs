use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `c64car` crate.
#[derive(Error, Debug)]
pub enum CarError {
    /// A name, note or timestamp is outside the bounds the format can store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The stream is not a well-formed `.car` archive (bad magic, version or tag).
    #[error("Invalid archive: {0}")]
    Format(String),

    /// The archive or input uses a feature this implementation cannot handle.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Two insertions describe the same archive path with different records.
    #[error("Merge conflict at '{path}': {reason}")]
    MergeConflict { path: String, reason: String },

    /// The top of an inserted chain is a different record type than the manifest root.
    #[error("Record type mismatch at root '{0}'")]
    TypeMismatch(String),

    /// The stream ended before a declared size was satisfied.
    #[error("Truncated archive: {0}")]
    TruncatedArchive(String),

    #[error("No record named '{0}'")]
    NotFound(String),

    /// The first segment of a lookup does not name the manifest root.
    #[error("'{requested}' does not start at the archive root '{root}'")]
    RootMismatch { requested: String, root: String },

    /// A character (or byte) has no mapping in the PETSCII character set.
    #[error("Cannot encode '{0}' as PETSCII")]
    Encoding(String),

    #[error("The manifest has no root record")]
    EmptyManifest,

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },

    /// An insertion path does not lie under the manifest base directory.
    #[error("Could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// An error while reading a JSON build plan.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CarError>;

impl CarError {
    pub(crate) fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        CarError::Io { source, path: path.into() }
    }

    /// Maps a failed read from the archive stream. Running out of input means
    /// the archive is shorter than its headers declare.
    pub(crate) fn from_stream(source: io::Error, what: &str) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            CarError::TruncatedArchive(format!("stream ended while reading {what}"))
        } else {
            CarError::Io { source, path: PathBuf::new() }
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for CarError {
    fn from(err: io::Error) -> Self {
        CarError::Io { source: err, path: PathBuf::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_maps_to_truncation() {
        let err = CarError::from_stream(io::Error::from(io::ErrorKind::UnexpectedEof), "a record header");
        assert!(matches!(err, CarError::TruncatedArchive(_)));

        let err = CarError::from_stream(io::Error::from(io::ErrorKind::PermissionDenied), "a record header");
        assert!(matches!(err, CarError::Io { .. }));
    }

    #[test]
    fn io_error_display_names_the_path() {
        let err = CarError::io(io::Error::from(io::ErrorKind::NotFound), "/tmp/missing.prg");
        assert!(err.to_string().contains("/tmp/missing.prg"));
    }
}
