use chrono::{DateTime, Local};
use std::path::Path;
use thiserror::Error;

use crate::models::{ArchiverError, Credentials, Result};

use super::address::FtpAddress;

/// Reply code for "file unavailable"
pub const CODE_NOT_FOUND: u16 = 550;
/// Reply code for "file name not allowed", returned when renaming over an existing file
pub const CODE_DESTINATION_EXISTS: u16 = 553;

/// TLS negotiation of the control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslSupportMode {
    /// TLS from the first byte
    Implicit,
    /// `AUTH TLS` after connecting
    Explicit,
    /// Clear text
    None,
}

impl SslSupportMode {
    /// Every mode, most secure first
    pub const ALL: [SslSupportMode; 3] = [SslSupportMode::Implicit, SslSupportMode::Explicit, SslSupportMode::None];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataConnectionMode {
    Passive,
    Active,
}

/// Entry of a remote directory listing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

/// Errors returned by an FTP client
#[derive(Error, Debug)]
pub enum FtpError {
    #[error("FTP command failed ({code}): {message}")]
    Command { code: u16, message: String },

    #[error("FTP connection error: {0}")]
    Connection(String),

    #[error("Transfer aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How the archiver reacts to a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpReply {
    /// The file does not exist; skip it
    NotFound,
    /// The rename target exists; delete it and retry once
    DestinationExists,
    /// Anything else; fatal
    Other,
}

impl FtpError {
    pub fn reply_kind(&self) -> FtpReply {
        match self {
            FtpError::Command { code: CODE_NOT_FOUND, .. } => FtpReply::NotFound,
            FtpError::Command { code: CODE_DESTINATION_EXISTS, .. } => FtpReply::DestinationExists,
            _ => FtpReply::Other,
        }
    }
}

/// Transfer progress: bytes done and total bytes when known
///
/// Returning `false` asks the client to stop the transfer with
/// [`FtpError::Aborted`].
pub type TransferCallback<'a> = dyn FnMut(u64, Option<u64>) -> bool + 'a;

/// FTP/FTPS protocol client used by the FTP archiver
///
/// Remote paths are absolute (`/dir/file`) or relative to the current
/// directory.
pub trait FtpClient: Send {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        credentials: Option<&Credentials>,
        ssl: SslSupportMode,
        data_mode: DataConnectionMode,
    ) -> std::result::Result<(), FtpError>;

    fn is_connected(&self) -> bool;

    fn current_directory(&mut self) -> std::result::Result<String, FtpError>;

    fn set_current_directory(&mut self, path: &str) -> std::result::Result<(), FtpError>;

    /// Size of a remote file, `None` when the server does not tell
    fn file_size(&mut self, path: &str) -> std::result::Result<Option<u64>, FtpError>;

    fn put_file(&mut self, local: &Path, remote: &str, progress: &mut TransferCallback<'_>) -> std::result::Result<(), FtpError>;

    fn get_file(&mut self, remote: &str, local: &Path, progress: &mut TransferCallback<'_>) -> std::result::Result<(), FtpError>;

    fn make_dir(&mut self, path: &str, recursive: bool) -> std::result::Result<(), FtpError>;

    fn delete_file(&mut self, path: &str) -> std::result::Result<(), FtpError>;

    fn rename(&mut self, from: &str, to: &str) -> std::result::Result<(), FtpError>;

    /// Entries of the current directory
    fn list_directory(&mut self) -> std::result::Result<Vec<RemoteEntry>, FtpError>;

    fn close(&mut self);
}

/// Creates the clients pooled by the FTP archiver
pub trait FtpConnector: Send + Sync {
    fn create(&self) -> Box<dyn FtpClient>;
}

impl<F> FtpConnector for F
where
    F: Fn() -> Box<dyn FtpClient> + Send + Sync,
{
    fn create(&self) -> Box<dyn FtpClient> {
        self()
    }
}

/// Connect trying every TLS mode, in passive then active data mode
///
/// The error lists the failure of every attempt.
pub fn connect(client: &mut dyn FtpClient, address: &FtpAddress) -> Result<()> {
    let mut failures = Vec::new();

    for data_mode in [DataConnectionMode::Passive, DataConnectionMode::Active] {
        for ssl in SslSupportMode::ALL {
            let port = address.port_for(ssl);
            match client.connect(&address.host, port, address.credentials.as_ref(), ssl, data_mode) {
                Ok(()) if client.is_connected() => {
                    log::debug!("Connected to {}:{} ({:?}, {:?})", address.host, port, ssl, data_mode);
                    return Ok(());
                }
                Ok(()) => {
                    client.close();
                    failures.push(format!("{:?}/{:?} >> not connected", ssl, data_mode));
                }
                Err(e) => failures.push(format!("{:?}/{:?} >> {}", ssl, data_mode, e)),
            }
        }
    }

    let username = address.credentials.as_ref().map(|c| c.username.as_str()).unwrap_or("none");
    Err(ArchiverError::wrap(
        format!(
            "Failed to connect to a FTP server with: Username: {}, Host: {}, Port: {}",
            username,
            address.host,
            address.port.unwrap_or(21)
        ),
        ArchiverError::new(failures.join("\n")),
    ))
}

/// Reuse the connection when it still answers, reconnect otherwise
pub fn connect_or_reconnect(client: &mut dyn FtpClient, address: &FtpAddress) -> Result<()> {
    if client.is_connected() {
        match client.current_directory() {
            Ok(_) => return Ok(()),
            Err(e) => log::debug!("FTP connection to {} is stale: {}", address.host, e),
        }
        client.close();
    }
    connect(client, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_kind() {
        let not_found = FtpError::Command { code: 550, message: "No such file".into() };
        let exists = FtpError::Command { code: 553, message: "File exists".into() };
        let denied = FtpError::Command { code: 530, message: "Not logged in".into() };
        assert_eq!(not_found.reply_kind(), FtpReply::NotFound);
        assert_eq!(exists.reply_kind(), FtpReply::DestinationExists);
        assert_eq!(denied.reply_kind(), FtpReply::Other);
        assert_eq!(FtpError::Connection("refused".into()).reply_kind(), FtpReply::Other);
    }

    #[test]
    fn test_modes_most_secure_first() {
        assert_eq!(SslSupportMode::ALL[0], SslSupportMode::Implicit);
        assert_eq!(SslSupportMode::ALL[2], SslSupportMode::None);
    }
}
