//! Source reader adapters.

use lcovmerge_ports::{ReadError, SourceReader};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Filesystem-backed reader.
///
/// Absolute paths are read as-is; relative paths are resolved against the
/// configured root (the current directory when no root is set).
#[derive(Debug, Clone, Default)]
pub struct FsSourceReader {
    root: Option<PathBuf>,
}

impl FsSourceReader {
    /// Create a reader that resolves relative paths against the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader that resolves relative paths against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) if !Path::new(path).is_absolute() => root.join(path),
            _ => PathBuf::from(path),
        }
    }
}

impl SourceReader for FsSourceReader {
    fn read(&self, path: &str) -> Result<Vec<u8>, ReadError> {
        let full_path = self.resolve(path);
        tracing::trace!(path = %full_path.display(), "reading file");
        std::fs::read(&full_path).map_err(ReadError::from)
    }
}

/// Reader serving files from memory.
///
/// Paths that were never registered read as [`ReadError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryReader {
    files: BTreeMap<String, Result<Vec<u8>, ReadError>>,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `content` under `path`, replacing any previous entry.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), Ok(content.into()));
    }

    /// Builder form of [`InMemoryReader::insert`].
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    /// Make every read of `path` fail with an I/O error carrying `message`.
    pub fn insert_io_error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.files
            .insert(path.into(), Err(ReadError::Io(message.into())));
    }
}

impl SourceReader for InMemoryReader {
    fn read(&self, path: &str) -> Result<Vec<u8>, ReadError> {
        self.files
            .get(path)
            .cloned()
            .unwrap_or(Err(ReadError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_relative_and_absolute_paths() {
        let temp = TempDir::new().expect("temp dir");
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).expect("create dir");
        let file_path = src.join("lib.c");
        std::fs::write(&file_path, "line1\nline2\n").expect("write file");

        let reader = FsSourceReader::with_root(temp.path());
        assert_eq!(reader.read("src/lib.c").unwrap(), b"line1\nline2\n");

        let abs_path = file_path.to_string_lossy().to_string();
        assert_eq!(FsSourceReader::new().read(&abs_path).unwrap(), b"line1\nline2\n");
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = TempDir::new().expect("temp dir");
        let reader = FsSourceReader::with_root(temp.path());
        assert_eq!(reader.read("nope.c"), Err(ReadError::NotFound));
    }

    #[test]
    fn directory_read_is_io_error() {
        let temp = TempDir::new().expect("temp dir");
        let reader = FsSourceReader::new();
        let err = reader
            .read(&temp.path().to_string_lossy())
            .expect_err("directories cannot be read");
        assert!(!err.is_not_found());
    }

    #[test]
    fn in_memory_reader_serves_registered_files() {
        let mut reader = InMemoryReader::new().with_file("/a.c", "int a;\n");
        reader.insert_io_error("/b.c", "device busy");

        assert_eq!(reader.read("/a.c").unwrap(), b"int a;\n");
        assert_eq!(reader.read("/b.c"), Err(ReadError::Io("device busy".into())));
        assert_eq!(reader.read("/c.c"), Err(ReadError::NotFound));
    }
}
