//! Shared port traits for lcovmerge's hexagonal architecture.
//!
//! The merge core never touches the filesystem directly. Trace inputs and
//! the source files referenced by `SF:` records are both obtained through
//! [`SourceReader`], so tests can substitute an in-memory implementation.

use thiserror::Error;

/// Why a read through a [`SourceReader`] failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The path does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// The path exists but could not be read.
    #[error("{0}")]
    Io(String),
}

impl ReadError {
    /// Returns true for [`ReadError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReadError::NotFound)
    }
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ReadError::NotFound
        } else {
            ReadError::Io(err.to_string())
        }
    }
}

/// Port for reading the full content of a named file.
pub trait SourceReader {
    /// Read every byte of `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>, ReadError>;
}

impl<R: SourceReader + ?Sized> SourceReader for &R {
    fn read(&self, path: &str) -> Result<Vec<u8>, ReadError> {
        (**self).read(path)
    }
}
