//! Batched file operations over heterogeneous archive backends.
//!
//! An archive is addressed by a path string whose meaning depends on the
//! backend: a directory for [`FileSystemArchiver`], a `.zip` file for
//! [`ZipArchiver`], an `ftp://` address for [`FtpArchiver`] and a base URL
//! for [`HttpFileServerArchiver`]. Every operation takes a batch of
//! descriptors, flags the ones it processed and returns their count.
//!
//! ```ignore
//! use uniarchive::{new_archiver, ArchiverKind, FileToArchive, OperationContext};
//!
//! let archiver = new_archiver(ArchiverKind::Zip)?;
//! let mut files = vec![FileToArchive::new("backup.zip", "docs/a.txt", "a.txt")];
//! archiver.archive_file_set(&mut files, &OperationContext::new())?;
//! ```

// Module declarations
pub mod core;
pub mod models;
pub mod utils;

pub use crate::core::archiver::{
    new_archiver, new_full_featured_archiver, ArchiverBasic, ArchiverCheck, ArchiverDelete,
    ArchiverExtract, ArchiverFullFeatured, ArchiverList, ArchiverMove, ArchiverPack,
};
pub use crate::core::batch::{CancellationToken, OperationContext};
pub use crate::core::filesystem::FileSystemArchiver;
pub use crate::core::ftp::{FtpArchiver, FtpClient, FtpConnector};
pub use crate::core::http::{HttpFileServerArchiver, HttpTransport, ReqwestTransport};
pub use crate::core::zip::ZipArchiver;
pub use crate::models::*;
pub use crate::utils::progress::{ProgressCallback, ProgressEvent};
