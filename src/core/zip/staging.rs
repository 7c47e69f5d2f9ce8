use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::models::{ArchiverError, Result};

/// Hidden scratch directory used while moving entries inside an archive
///
/// Created next to the archive, or in the system temporary directory when
/// the archive path has no parent. Removed when dropped.
pub struct StagingDir {
    temp_dir: TempDir,
}

impl StagingDir {
    /// Create the staging directory for `archive_path`
    pub fn new(archive_path: &Path) -> Result<Self> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(".~");
            builder
        };

        let temp_dir = match archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| ArchiverError::wrap("Failed to create staging directory", e))?;

        Ok(Self { temp_dir })
    }

    pub fn base_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of a staged file, creating its parent directories
    ///
    /// # Arguments
    /// * `relative_path` - Entry name, with `/` separators
    pub fn file_path(&self, relative_path: &str) -> Result<PathBuf> {
        let path = relative_path
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .fold(self.base_path().to_path_buf(), |acc, segment| acc.join(segment));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ArchiverError::wrap(format!("Failed to create directory {}", parent.display()), e)
            })?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_created_next_to_archive() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("test.zip");
        let staging = StagingDir::new(&archive).unwrap();

        assert!(staging.base_path().exists());
        assert_eq!(staging.base_path().parent().unwrap(), temp.path());
        let name = staging.base_path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".~"));
    }

    #[test]
    fn test_without_parent_uses_system_temp() {
        let staging = StagingDir::new(Path::new("test.zip")).unwrap();
        assert!(staging.base_path().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_file_path_with_subdirs() {
        let temp = TempDir::new().unwrap();
        let staging = StagingDir::new(&temp.path().join("a.zip")).unwrap();

        let path = staging.file_path("images/photos/../photo.jpg").unwrap();
        assert!(path.starts_with(staging.base_path()));
        assert!(path.parent().unwrap().is_dir());
        assert!(path.ends_with("images/photos/photo.jpg"));
    }

    #[test]
    fn test_cleanup_on_drop() {
        let temp = TempDir::new().unwrap();
        let base_path;
        {
            let staging = StagingDir::new(&temp.path().join("a.zip")).unwrap();
            base_path = staging.base_path().to_path_buf();
            fs::write(staging.file_path("x/y.txt").unwrap(), b"data").unwrap();
        }
        assert!(!base_path.exists());
    }
}
