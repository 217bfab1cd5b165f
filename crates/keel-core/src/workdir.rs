//! Scoped working directories

use std::path::{Path, PathBuf};

use crate::error::Result;

/// A temporary directory owned by a single render or apply operation
///
/// The directory and everything under it is removed when the value is
/// dropped, on success and failure paths alike.
#[derive(Debug)]
pub struct WorkDir {
    inner: tempfile::TempDir,
}

impl WorkDir {
    /// Create a fresh directory in the system temp location, prefixed by `name`
    pub fn new(name: &str) -> Result<Self> {
        let inner = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(name)))
            .tempdir()?;
        tracing::debug!(path = %inner.path().display(), "created work directory");
        Ok(Self { inner })
    }

    /// Create a fresh directory under `parent`
    pub fn new_in(parent: &Path, name: &str) -> Result<Self> {
        let inner = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(name)))
            .tempdir_in(parent)?;
        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Keep the directory on disk and hand ownership of the path to the caller
    pub fn keep(self) -> PathBuf {
        self.inner.keep()
    }
}

impl AsRef<Path> for WorkDir {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "chart".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let dir = WorkDir::new("my/chart").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("my_chart-")
        );

        std::fs::write(path.join("file"), "x").unwrap();
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_keep() {
        let dir = WorkDir::new("kept").unwrap();
        let path = dir.keep();
        assert!(path.is_dir());
        std::fs::remove_dir_all(&path).unwrap();
    }
}
