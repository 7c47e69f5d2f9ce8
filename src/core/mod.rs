// Archiver backends and the batch engine they share
pub mod archiver;
pub mod batch;
pub mod filesystem;
pub mod ftp;
pub mod http;
pub mod zip;
