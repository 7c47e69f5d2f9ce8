use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shape shared by every descriptor handed to a batch operation
///
/// The engine only ever writes the `processed` flag.
pub trait ArchivedFile {
    /// Archive containing the file: zip path, directory, FTP URI or HTTP base URL
    fn archive_path(&self) -> &str;

    /// Relative path of the file inside the archive
    fn path_in_archive(&self) -> &str;

    fn processed(&self) -> bool;

    fn set_processed(&mut self, processed: bool);
}

macro_rules! impl_archived_file {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ArchivedFile for $ty {
                fn archive_path(&self) -> &str {
                    &self.archive_path
                }

                fn path_in_archive(&self) -> &str {
                    &self.path_in_archive
                }

                fn processed(&self) -> bool {
                    self.processed
                }

                fn set_processed(&mut self, processed: bool) {
                    self.processed = processed;
                }
            }
        )+
    };
}

/// A local file to add (or overwrite) inside an archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileToArchive {
    pub archive_path: String,
    pub path_in_archive: String,
    /// Local file read when packing
    pub source_path: PathBuf,
    #[serde(default)]
    pub processed: bool,
}

impl FileToArchive {
    pub fn new(
        archive_path: impl Into<String>,
        path_in_archive: impl Into<String>,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            path_in_archive: path_in_archive.into(),
            source_path: source_path.into(),
            processed: false,
        }
    }
}

/// An archived file to copy out to a local path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileToExtract {
    pub archive_path: String,
    pub path_in_archive: String,
    /// Local file written when extracting
    pub extraction_path: PathBuf,
    #[serde(default)]
    pub processed: bool,
}

impl FileToExtract {
    pub fn new(
        archive_path: impl Into<String>,
        path_in_archive: impl Into<String>,
        extraction_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            path_in_archive: path_in_archive.into(),
            extraction_path: extraction_path.into(),
            processed: false,
        }
    }
}

/// An archived file to rename within its own archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileToMove {
    pub archive_path: String,
    pub path_in_archive: String,
    pub new_path_in_archive: String,
    #[serde(default)]
    pub processed: bool,
}

impl FileToMove {
    pub fn new(
        archive_path: impl Into<String>,
        path_in_archive: impl Into<String>,
        new_path_in_archive: impl Into<String>,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            path_in_archive: path_in_archive.into(),
            new_path_in_archive: new_path_in_archive.into(),
            processed: false,
        }
    }
}

/// An archived file to remove
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileToDelete {
    pub archive_path: String,
    pub path_in_archive: String,
    #[serde(default)]
    pub processed: bool,
}

impl FileToDelete {
    pub fn new(archive_path: impl Into<String>, path_in_archive: impl Into<String>) -> Self {
        Self {
            archive_path: archive_path.into(),
            path_in_archive: path_in_archive.into(),
            processed: false,
        }
    }
}

/// An archived file whose existence should be checked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileToCheck {
    pub archive_path: String,
    pub path_in_archive: String,
    #[serde(default)]
    pub processed: bool,
}

impl FileToCheck {
    pub fn new(archive_path: impl Into<String>, path_in_archive: impl Into<String>) -> Self {
        Self {
            archive_path: archive_path.into(),
            path_in_archive: path_in_archive.into(),
            processed: false,
        }
    }
}

/// A file found in an archive by `list_files`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInArchive {
    pub archive_path: String,
    pub path_in_archive: String,
    pub size_in_bytes: u64,
    /// `None` when the store does not record a usable timestamp
    pub last_write_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub processed: bool,
}

impl_archived_file!(
    FileToArchive,
    FileToExtract,
    FileToMove,
    FileToDelete,
    FileToCheck,
    FileInArchive,
);
