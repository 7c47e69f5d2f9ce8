// Capability traits implemented by the archive backends

use crate::core::batch::OperationContext;
use crate::core::filesystem::FileSystemArchiver;
use crate::core::http::HttpFileServerArchiver;
use crate::core::zip::ZipArchiver;
use crate::models::{
    ArchiverError, ArchiverKind, FileInArchive, FileToArchive, FileToCheck, FileToDelete,
    FileToExtract, FileToMove, HttpOptions, Result,
};

/// Add or overwrite files in archives
pub trait ArchiverPack: Send + Sync {
    /// Write each file's `source_path` at `path_in_archive` inside `archive_path`
    ///
    /// Missing source files are skipped.
    ///
    /// # Returns
    /// * Number of files written; equals the number of descriptors flagged processed
    fn archive_file_set(&self, files: &mut [FileToArchive], ctx: &OperationContext) -> Result<usize>;
}

/// Enumerate the content of an archive
pub trait ArchiverList: Send + Sync {
    /// List every file of `archive_path`
    ///
    /// A missing archive yields an empty list, not an error.
    fn list_files(&self, archive_path: &str, ctx: &OperationContext) -> Result<Vec<FileInArchive>>;
}

/// Check whether files exist in archives
pub trait ArchiverCheck: Send + Sync {
    /// Flag as processed every descriptor whose file exists
    ///
    /// # Returns
    /// * Number of existing files
    fn check_file_set(&self, files: &mut [FileToCheck], ctx: &OperationContext) -> Result<usize>;
}

/// Copy files out of archives
pub trait ArchiverExtract: Send + Sync {
    /// Extract each existing file to its `extraction_path`, overwriting it
    ///
    /// Files missing from their archive are skipped.
    fn extract_file_set(&self, files: &mut [FileToExtract], ctx: &OperationContext) -> Result<usize>;
}

/// Rename files within their archive
pub trait ArchiverMove: Send + Sync {
    /// Move `path_in_archive` to `new_path_in_archive`
    ///
    /// Missing sources are skipped; an existing destination is replaced.
    fn move_file_set(&self, files: &mut [FileToMove], ctx: &OperationContext) -> Result<usize>;
}

/// Remove files from archives
pub trait ArchiverDelete: Send + Sync {
    /// Delete each existing file; missing files are skipped
    fn delete_file_set(&self, files: &mut [FileToDelete], ctx: &OperationContext) -> Result<usize>;
}

/// Pack, extract and delete
pub trait ArchiverBasic: ArchiverPack + ArchiverExtract + ArchiverDelete {}

impl<T> ArchiverBasic for T where T: ArchiverPack + ArchiverExtract + ArchiverDelete {}

/// Every capability
pub trait ArchiverFullFeatured: ArchiverBasic + ArchiverList + ArchiverCheck + ArchiverMove {}

impl<T> ArchiverFullFeatured for T where T: ArchiverBasic + ArchiverList + ArchiverCheck + ArchiverMove {}

/// Create an archiver for `kind` with its default settings
///
/// The FTP archiver needs a client connector and is built with
/// [`crate::FtpArchiver::new`] instead.
pub fn new_archiver(kind: ArchiverKind) -> Result<Box<dyn ArchiverBasic>> {
    match kind {
        ArchiverKind::Filesystem => Ok(Box::new(FileSystemArchiver::new())),
        ArchiverKind::Zip => Ok(Box::new(ZipArchiver::new())),
        ArchiverKind::HttpFileServer => Ok(Box::new(HttpFileServerArchiver::new(&HttpOptions::default())?)),
        ArchiverKind::Ftp => Err(ArchiverError::new(
            "The FTP archiver needs a client connector, create it with FtpArchiver::new",
        )),
    }
}

/// Create an archiver supporting every capability
///
/// Only the filesystem and zip backends qualify without extra setup.
pub fn new_full_featured_archiver(kind: ArchiverKind) -> Result<Box<dyn ArchiverFullFeatured>> {
    match kind {
        ArchiverKind::Filesystem => Ok(Box::new(FileSystemArchiver::new())),
        ArchiverKind::Zip => Ok(Box::new(ZipArchiver::new())),
        other => Err(ArchiverError::new(format!("{:?} archivers do not support every operation", other))),
    }
}
