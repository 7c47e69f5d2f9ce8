pub mod config;
pub mod error;
pub mod file;

// Re-export commonly used types
pub use config::{ArchiverKind, CompressionLevel, Credentials, HttpOptions, ProxySettings};
pub use error::{ArchiverError, BoxError, Result};
pub use file::{
    ArchivedFile, FileInArchive, FileToArchive, FileToCheck, FileToDelete, FileToExtract,
    FileToMove,
};
