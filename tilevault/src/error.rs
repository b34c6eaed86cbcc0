//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the library reports through [`Error`]. Reads
//! that cannot locate a key either return `None` (the `*_opt` driver
//! variants) or fail with [`Error::NoSuchFile`]; format corruption fails the
//! single call with [`Error::Format`] and does not poison other keys;
//! writer-side failures abort the whole flush and leave the pre-flush state
//! on disk.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by tile-set, driver and archive operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested key or path does not exist
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes do not parse as the expected format
    #[error("format error in {path}: {detail}")]
    Format {
        /// Offending file or stream name
        path: String,
        /// What failed to parse
        detail: String,
    },

    /// Caller-supplied data violates an invariant
    #[error("inconsistent input: {0}")]
    InconsistentInput(String),

    /// Creation target already exists
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Mutation attempted on a read-only tile set or archive
    #[error("read-only violation: {0}")]
    ReadOnly(String),

    /// Operation observed its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Invariant broken inside the library itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a format error.
    pub fn format(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_such_file_display() {
        let err = Error::NoSuchFile("10-3-1.mesh".to_string());
        assert_eq!(err.to_string(), "no such file: 10-3-1.mesh");
    }

    #[test]
    fn test_format_display_names_path() {
        let err = Error::format("tileindex.bin", "bad magic");
        let msg = err.to_string();
        assert!(msg.contains("tileindex.bin"));
        assert!(msg.contains("bad magic"));
    }

    #[test]
    fn test_io_error_converts() {
        fn failing() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"))?;
            Ok(())
        }
        assert!(matches!(failing(), Err(Error::Io(_))));
    }
}
