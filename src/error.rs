use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::format::FormatVersion;

/// The primary error type for all operations in the `phragdat` crate.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// A required path argument was missing, empty or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A directory was expected but the path is a file or does not exist.
    #[error("'{}' is not a valid directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Extraction refuses to overwrite an existing file.
    #[error("'{}' already exists at output path, will not overwrite", path.display())]
    AlreadyExists { path: PathBuf },

    /// The extraction selector matched no archive entry.
    #[error("'{selector}' not found in archive")]
    NotFound { selector: String },

    /// The archive failed one of its structural checks (magic, size self-check, section bounds).
    #[error("Archive '{}' is corrupted or truncated: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    /// The archive was written by an incompatible format version.
    #[error("Version mismatch: archive is v{found}, this reader supports v{supported}")]
    VersionMismatch {
        found: FormatVersion,
        supported: FormatVersion,
    },

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// The archive output location lies inside the tree being archived.
    #[error("Output '{}' is within input '{}'", output.display(), input.display())]
    OutputInsideInput { output: PathBuf, input: PathBuf },

    /// An error occurred when trying to strip a prefix from a file path.
    #[error("Could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// Two input files map to the same archive path.
    #[error("Duplicate archive path '{path}'")]
    DuplicateEntry { path: String },

    /// A path is too long for its 2-byte length prefix.
    #[error("Path '{path}' is {len} bytes, longer than the format allows")]
    PathTooLong { path: String, len: usize },

    /// A source file changed size between traversal and writing.
    #[error("'{}' changed during compile: expected {expected} bytes, read {actual}", path.display())]
    SourceChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Directory enumeration failed.
    #[error("Directory traversal failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// The sidecar table could not be read or written.
    #[error("Sidecar index error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ArchiverError>;

impl ArchiverError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        ArchiverError::CorruptArchive {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for ArchiverError {
    fn from(err: std::io::Error) -> Self {
        ArchiverError::Io {
            source: err,
            path: PathBuf::new(),
        }
    }
}

/// Attaches the offending path to a raw `std::io::Error`.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| ArchiverError::Io {
            source,
            path: path.as_ref().to_path_buf(),
        })
    }
}
