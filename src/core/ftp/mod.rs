//! Archives stored on FTP/FTPS servers
//!
//! The archive path is an `ftp[s]://` address; entries live under the
//! address path. The protocol itself is provided by an [`FtpClient`]
//! implementation created through an [`FtpConnector`].

pub mod address;
pub mod client;

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::archiver::{
    ArchiverCheck, ArchiverDelete, ArchiverExtract, ArchiverList, ArchiverMove, ArchiverPack,
};
use crate::core::batch::{self, OperationContext};
use crate::models::error::quote;
use crate::models::{
    ArchivedFile, ArchiverError, FileInArchive, FileToArchive, FileToCheck, FileToDelete,
    FileToExtract, FileToMove, Result,
};
use crate::utils::path::{join_remote, normalize_relative, relative_parent};
use crate::utils::progress::ProgressEmitter;

pub use address::FtpAddress;
pub use client::{
    DataConnectionMode, FtpClient, FtpConnector, FtpError, FtpReply, RemoteEntry, SslSupportMode,
    TransferCallback,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Pack,
    Extract,
    Move,
    Delete,
    Check,
}

impl Action {
    fn group_failure(self, archive_path: &str) -> String {
        let (verb, preposition) = match self {
            Action::Pack => ("send", "to"),
            Action::Extract => ("get", "from"),
            Action::Move => ("move", "in"),
            Action::Delete => ("delete", "from"),
            Action::Check => ("check", "in"),
        };
        format!("Failed to {} files {} {}", verb, preposition, quote(archive_path))
    }

    /// Deleting from an unreachable server is a no-op, every other action fails
    fn skips_unreachable(self) -> bool {
        self == Action::Delete
    }
}

/// Archiver storing files on FTP servers
///
/// One client is kept per server (base address) and reconnected on demand;
/// it is closed after each archive group. Calls on different servers run
/// concurrently, calls on the same server wait for each other.
pub struct FtpArchiver {
    connector: Box<dyn FtpConnector>,
    clients: Mutex<HashMap<String, Arc<Mutex<Box<dyn FtpClient>>>>>,
}

impl FtpArchiver {
    pub fn new(connector: impl FtpConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` with a connected client for `address`
    ///
    /// # Returns
    /// * `None` when the server is unreachable and `skip_unreachable` is set
    fn with_client<R, F>(&self, address: &FtpAddress, skip_unreachable: bool, work: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut dyn FtpClient) -> Result<R>,
    {
        let shared = {
            let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                clients
                    .entry(address.base_uri.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(self.connector.create()))),
            )
        };
        let mut connection = shared.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = client::connect_or_reconnect(&mut **connection, address) {
            if skip_unreachable {
                log::warn!("Skipping {}: {}", address.base_uri, e);
                return Ok(None);
            }
            return Err(e);
        }

        let result = work(&mut **connection);
        connection.close();
        result.map(Some)
    }

    /// Run `step` on every file, one connection per archive group
    ///
    /// `step` receives the number of files completed so far and tells
    /// whether the file was processed.
    fn run<T, F>(
        &self,
        files: &mut [T],
        ctx: &OperationContext,
        emitter: &ProgressEmitter<'_>,
        action: Action,
        mut step: F,
    ) -> Result<usize>
    where
        T: ArchivedFile,
        F: FnMut(&mut dyn FtpClient, &FtpAddress, &mut T, usize) -> Result<bool>,
    {
        batch::reset_processed(files);
        let mut files_done = 0usize;

        for (archive_path, group) in batch::group_by_archive(files) {
            let address = FtpAddress::parse(&archive_path)
                .map_err(|e| ArchiverError::wrap(action.group_failure(&archive_path), e))?;
            ctx.check_canceled()?;
            log::debug!("Processing {} file(s) on {}", group.len(), address.base_uri);

            self.with_client(&address, action.skips_unreachable(), |client| {
                for file in group {
                    ctx.check_canceled()?;
                    if step(&mut *client, &address, &mut *file, files_done)? {
                        file.set_processed(true);
                        files_done += 1;
                        if action != Action::Check {
                            emitter.emit_files_done(file.archive_path(), file.path_in_archive(), files_done);
                        }
                    }
                }
                Ok(())
            })
            .map_err(|e| ArchiverError::wrap(action.group_failure(&archive_path), e))?;
        }

        log::info!("{:?} done for {} of {} file(s) on FTP servers", action, files_done, files.len());
        Ok(files_done)
    }
}

/// Error raised when a transfer stopped: cancellation wins over the client error
fn transfer_error(ctx: &OperationContext, error: FtpError, message: String) -> ArchiverError {
    if ctx.is_canceled() {
        ArchiverError::Canceled
    } else {
        ArchiverError::wrap(message, error)
    }
}

impl ArchiverPack for FtpArchiver {
    fn archive_file_set(&self, files: &mut [FileToArchive], ctx: &OperationContext) -> Result<usize> {
        let emitter = ctx.emitter(files.len());
        self.run(files, ctx, &emitter, Action::Pack, |client, address, file, files_done| {
            if !file.source_path.is_file() {
                log::debug!("Skipping missing file {}", file.source_path.display());
                return Ok(false);
            }

            let remote = address.remote_path(&file.path_in_archive);
            let mut progress = |done: u64, total: Option<u64>| {
                emitter.emit_bytes(&file.archive_path, &file.path_in_archive, files_done, done, total);
                !ctx.is_canceled()
            };

            let mut sent = client.put_file(&file.source_path, &remote, &mut progress);
            if let Err(e) = &sent {
                if !ctx.is_canceled() {
                    log::warn!("Upload of {} failed ({}), creating its directory and retrying", remote, e);
                    let parent = relative_parent(&remote);
                    let created = if parent.is_empty() { Ok(()) } else { client.make_dir(parent, true) };
                    sent = created
                        .and_then(|_| client.set_current_directory("/"))
                        .and_then(|_| client.put_file(&file.source_path, &remote, &mut progress));
                }
            }

            match sent {
                Ok(()) => Ok(true),
                Err(e) => {
                    if ctx.is_canceled() {
                        // unfinished upload
                        let _ = client.delete_file(&remote);
                    }
                    Err(transfer_error(
                        ctx,
                        e,
                        format!(
                            "Failed to send {} to {} and distant path {}",
                            quote(file.source_path.to_string_lossy()),
                            quote(&file.archive_path),
                            quote(&file.path_in_archive)
                        ),
                    ))
                }
            }
        })
    }
}

impl ArchiverExtract for FtpArchiver {
    fn extract_file_set(&self, files: &mut [FileToExtract], ctx: &OperationContext) -> Result<usize> {
        for parent in files.iter().filter_map(|f| f.extraction_path.parent()) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ArchiverError::wrap(format!("Failed to create directory {}", quote(parent.to_string_lossy())), e)
                })?;
            }
        }

        let emitter = ctx.emitter(files.len());
        self.run(files, ctx, &emitter, Action::Extract, |client, address, file, files_done| {
            let remote = address.remote_path(&file.path_in_archive);
            let mut progress = |done: u64, total: Option<u64>| {
                emitter.emit_bytes(&file.archive_path, &file.path_in_archive, files_done, done, total);
                !ctx.is_canceled()
            };

            match client.get_file(&remote, &file.extraction_path, &mut progress) {
                Ok(()) => Ok(true),
                Err(e) if e.reply_kind() == FtpReply::NotFound => {
                    log::debug!("Skipping missing remote file {}", remote);
                    Ok(false)
                }
                Err(e) => {
                    if ctx.is_canceled() {
                        // unfinished download
                        let _ = fs::remove_file(&file.extraction_path);
                    }
                    Err(transfer_error(
                        ctx,
                        e,
                        format!(
                            "Failed to get {} from {} and distant path {}",
                            quote(file.extraction_path.to_string_lossy()),
                            quote(&file.archive_path),
                            quote(&file.path_in_archive)
                        ),
                    ))
                }
            }
        })
    }
}

impl ArchiverDelete for FtpArchiver {
    fn delete_file_set(&self, files: &mut [FileToDelete], ctx: &OperationContext) -> Result<usize> {
        let emitter = ctx.emitter(files.len());
        self.run(files, ctx, &emitter, Action::Delete, |client, address, file, _| {
            let remote = address.remote_path(&file.path_in_archive);
            match client.delete_file(&remote) {
                Ok(()) => Ok(true),
                Err(e) if e.reply_kind() == FtpReply::NotFound => Ok(false),
                Err(e) => Err(ArchiverError::wrap(
                    format!("Failed to delete {} from {}", quote(&file.path_in_archive), quote(&file.archive_path)),
                    e,
                )),
            }
        })
    }
}

impl ArchiverMove for FtpArchiver {
    fn move_file_set(&self, files: &mut [FileToMove], ctx: &OperationContext) -> Result<usize> {
        let emitter = ctx.emitter(files.len());
        self.run(files, ctx, &emitter, Action::Move, |client, address, file, _| {
            let from = address.remote_path(&file.path_in_archive);
            let to = address.remote_path(&file.new_path_in_archive);

            let renamed = match client.rename(&from, &to) {
                Err(e) if e.reply_kind() == FtpReply::NotFound => return Ok(false),
                Err(e) if e.reply_kind() == FtpReply::DestinationExists => {
                    log::debug!("Replacing existing remote file {}", to);
                    client.delete_file(&to).and_then(|_| client.rename(&from, &to))
                }
                other => other,
            };

            renamed.map(|_| true).map_err(|e| {
                ArchiverError::wrap(
                    format!(
                        "Failed to move {} to {} in {}",
                        quote(&file.path_in_archive),
                        quote(&file.new_path_in_archive),
                        quote(&file.archive_path)
                    ),
                    e,
                )
            })
        })
    }
}

impl ArchiverCheck for FtpArchiver {
    fn check_file_set(&self, files: &mut [FileToCheck], ctx: &OperationContext) -> Result<usize> {
        let emitter = ctx.emitter(files.len());
        self.run(files, ctx, &emitter, Action::Check, |client, address, file, _| {
            match client.file_size(&address.remote_path(&file.path_in_archive)) {
                Ok(size) => Ok(size.unwrap_or(0) > 0),
                Err(e) if e.reply_kind() == FtpReply::NotFound => Ok(false),
                Err(e) => Err(ArchiverError::wrap(
                    format!(
                        "Failed to get the size of {} from {}",
                        quote(&file.path_in_archive),
                        quote(&file.archive_path)
                    ),
                    e,
                )),
            }
        })
    }
}

impl ArchiverList for FtpArchiver {
    /// Paths are relative to the server root and the archive path of every
    /// listed file is the server base address
    fn list_files(&self, archive_path: &str, ctx: &OperationContext) -> Result<Vec<FileInArchive>> {
        let address = FtpAddress::parse(archive_path)?;
        ctx.check_canceled()?;

        let listed = self.with_client(&address, false, |client| {
            let mut listed = Vec::new();
            let mut folders = vec![address.path.clone().unwrap_or_else(|| "/".to_string())];

            let root = folders[0].clone();

            while let Some(folder) = folders.pop() {
                match client.set_current_directory(&folder) {
                    Ok(()) => {}
                    Err(e) if folder == root && e.reply_kind() == FtpReply::NotFound => {
                        log::debug!("Remote directory {} does not exist", folder);
                        return Ok(Vec::new());
                    }
                    Err(e) => {
                        return Err(ArchiverError::wrap(format!("Failed to open remote directory {}", quote(&folder)), e))
                    }
                }
                let entries = client
                    .list_directory()
                    .map_err(|e| ArchiverError::wrap(format!("Failed to list remote directory {}", quote(&folder)), e))?;

                for entry in entries {
                    ctx.check_canceled()?;
                    let path = join_remote(&folder, &entry.name);
                    if entry.is_directory {
                        folders.push(path);
                    } else {
                        listed.push(FileInArchive {
                            archive_path: address.base_uri.clone(),
                            path_in_archive: normalize_relative(&path),
                            size_in_bytes: entry.size,
                            last_write_time: entry.modified,
                            processed: false,
                        });
                    }
                }
            }
            Ok(listed)
        })?;

        Ok(listed.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::CancellationToken;
    use crate::models::Credentials;
    use crate::utils::progress::{ProgressCallback, ProgressEvent};
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory FTP server shared by the fake clients
    #[derive(Default)]
    struct FakeServer {
        files: BTreeMap<String, Vec<u8>>,
        dirs: BTreeSet<String>,
        accepted_ssl: Option<SslSupportMode>,
        unreachable: bool,
        connects: Vec<(u16, SslSupportMode, DataConnectionMode)>,
        closes: usize,
        /// Reply code returned by an operation instead of running it
        failures: HashMap<&'static str, u16>,
        /// `file_size` waits for this flag
        hold_size_until: Option<Arc<AtomicBool>>,
    }

    impl FakeServer {
        fn new() -> Arc<Mutex<FakeServer>> {
            let mut server = FakeServer::default();
            server.dirs.insert("/".to_string());
            Arc::new(Mutex::new(server))
        }

        fn injected(&self, operation: &'static str) -> std::result::Result<(), FtpError> {
            match self.failures.get(operation) {
                Some(code) => Err(FtpError::Command { code: *code, message: format!("{} refused", operation) }),
                None => Ok(()),
            }
        }
    }

    struct FakeClient {
        server: Arc<Mutex<FakeServer>>,
        connected: bool,
        cwd: String,
    }

    fn not_found(path: &str) -> FtpError {
        FtpError::Command { code: 550, message: format!("{}: no such file", path) }
    }

    impl FakeClient {
        fn resolve(&self, path: &str) -> String {
            let full = if path.starts_with('/') { path.to_string() } else { join_remote(&self.cwd, path) };
            format!("/{}", normalize_relative(&full))
        }
    }

    impl FtpClient for FakeClient {
        fn connect(
            &mut self,
            _host: &str,
            port: u16,
            _credentials: Option<&Credentials>,
            ssl: SslSupportMode,
            data_mode: DataConnectionMode,
        ) -> std::result::Result<(), FtpError> {
            let mut server = self.server.lock().unwrap();
            server.connects.push((port, ssl, data_mode));
            if server.unreachable {
                return Err(FtpError::Connection("connection refused".into()));
            }
            if server.accepted_ssl.map_or(false, |accepted| accepted != ssl) {
                return Err(FtpError::Connection(format!("{:?} not supported", ssl)));
            }
            self.connected = true;
            self.cwd = "/".to_string();
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn current_directory(&mut self) -> std::result::Result<String, FtpError> {
            Ok(self.cwd.clone())
        }

        fn set_current_directory(&mut self, path: &str) -> std::result::Result<(), FtpError> {
            let dir = self.resolve(path);
            if !self.server.lock().unwrap().dirs.contains(&dir) {
                return Err(not_found(path));
            }
            self.cwd = dir;
            Ok(())
        }

        fn file_size(&mut self, path: &str) -> std::result::Result<Option<u64>, FtpError> {
            let path = self.resolve(path);
            let hold = self.server.lock().unwrap().hold_size_until.clone();
            if let Some(release) = hold {
                let mut waited = 0;
                while !release.load(Ordering::SeqCst) {
                    if waited == 500 {
                        return Err(FtpError::Connection("timed out".into()));
                    }
                    thread::sleep(Duration::from_millis(10));
                    waited += 1;
                }
            }
            let server = self.server.lock().unwrap();
            server.injected("size")?;
            match server.files.get(&path) {
                Some(data) => Ok(Some(data.len() as u64)),
                None => Err(not_found(&path)),
            }
        }

        fn put_file(
            &mut self,
            local: &Path,
            remote: &str,
            progress: &mut TransferCallback<'_>,
        ) -> std::result::Result<(), FtpError> {
            let remote = self.resolve(remote);
            let data = fs::read(local)?;
            let parent = format!("/{}", relative_parent(&remote[1..]));
            let mut server = self.server.lock().unwrap();
            server.injected("put")?;
            if !server.dirs.contains(&parent) {
                return Err(not_found(&parent));
            }
            let half = data.len() as u64 / 2;
            if !progress(half, Some(data.len() as u64)) {
                server.files.insert(remote, data[..half as usize].to_vec());
                return Err(FtpError::Aborted);
            }
            progress(data.len() as u64, Some(data.len() as u64));
            server.files.insert(remote, data);
            Ok(())
        }

        fn get_file(
            &mut self,
            remote: &str,
            local: &Path,
            progress: &mut TransferCallback<'_>,
        ) -> std::result::Result<(), FtpError> {
            let remote = self.resolve(remote);
            self.server.lock().unwrap().injected("get")?;
            let data = match self.server.lock().unwrap().files.get(&remote) {
                Some(data) => data.clone(),
                None => return Err(not_found(&remote)),
            };
            let half = data.len() / 2;
            fs::write(local, &data[..half])?;
            if !progress(half as u64, Some(data.len() as u64)) {
                return Err(FtpError::Aborted);
            }
            fs::write(local, &data)?;
            progress(data.len() as u64, Some(data.len() as u64));
            Ok(())
        }

        fn make_dir(&mut self, path: &str, recursive: bool) -> std::result::Result<(), FtpError> {
            let path = self.resolve(path);
            let mut server = self.server.lock().unwrap();
            server.injected("mkdir")?;
            let mut current = String::new();
            for segment in normalize_relative(&path).split('/') {
                current = format!("{}/{}", current, segment);
                if !recursive && current != path && !server.dirs.contains(&current) {
                    return Err(not_found(&current));
                }
                server.dirs.insert(current.clone());
            }
            Ok(())
        }

        fn delete_file(&mut self, path: &str) -> std::result::Result<(), FtpError> {
            let path = self.resolve(path);
            let mut server = self.server.lock().unwrap();
            server.injected("delete")?;
            match server.files.remove(&path) {
                Some(_) => Ok(()),
                None => Err(not_found(&path)),
            }
        }

        fn rename(&mut self, from: &str, to: &str) -> std::result::Result<(), FtpError> {
            let (from, to) = (self.resolve(from), self.resolve(to));
            let mut server = self.server.lock().unwrap();
            server.injected("rename")?;
            if !server.files.contains_key(&from) {
                return Err(not_found(&from));
            }
            if server.files.contains_key(&to) {
                return Err(FtpError::Command { code: 553, message: "file exists".into() });
            }
            if let Some(data) = server.files.remove(&from) {
                server.files.insert(to, data);
            }
            Ok(())
        }

        fn list_directory(&mut self) -> std::result::Result<Vec<RemoteEntry>, FtpError> {
            let server = self.server.lock().unwrap();
            let prefix = if self.cwd == "/" { "/".to_string() } else { format!("{}/", self.cwd) };
            let direct_child = |path: &String| {
                path.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                    .map(str::to_string)
            };

            let mut entries: Vec<RemoteEntry> = server
                .dirs
                .iter()
                .filter_map(|dir| direct_child(dir))
                .map(|name| RemoteEntry { name, is_directory: true, size: 0, modified: None })
                .collect();
            entries.extend(server.files.iter().filter_map(|(path, data)| {
                direct_child(path).map(|name| RemoteEntry {
                    name,
                    is_directory: false,
                    size: data.len() as u64,
                    modified: None,
                })
            }));
            Ok(entries)
        }

        fn close(&mut self) {
            self.connected = false;
            self.server.lock().unwrap().closes += 1;
        }
    }

    fn archiver(server: &Arc<Mutex<FakeServer>>) -> FtpArchiver {
        let server = Arc::clone(server);
        FtpArchiver::new(move || -> Box<dyn FtpClient> {
            Box::new(FakeClient {
                server: Arc::clone(&server),
                connected: false,
                cwd: "/".to_string(),
            })
        })
    }

    const URI: &str = "ftp://127.0.0.1:2024/";

    fn create_sources(dir: &Path) -> Vec<PathBuf> {
        (1..=4)
            .map(|i| {
                let path = dir.join(format!("file{}.txt", i));
                fs::write(&path, format!("content number {}", i)).unwrap();
                path
            })
            .collect()
    }

    fn pack_list(sources: &[PathBuf]) -> Vec<FileToArchive> {
        let relative = ["file1.txt", "subfolder1/file2.txt", "\\subfolder1\\bla bla/file3.txt", "subfolder2/file4.txt"];
        sources
            .iter()
            .zip(relative.iter())
            .map(|(source, rel)| FileToArchive::new(URI, *rel, source))
            .collect()
    }

    #[test]
    fn test_pack_creates_directories() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let mut files = pack_list(&create_sources(temp.path()));
        files.push(FileToArchive::new(URI, "random.name", temp.path().join("random.name")));

        let count = archiver(&server).archive_file_set(&mut files, &OperationContext::new()).unwrap();
        assert_eq!(count, 4);
        assert!(!files[4].processed);

        let server = server.lock().unwrap();
        assert!(server.files.contains_key("/subfolder1/bla bla/file3.txt"));
        assert_eq!(server.files["/file1.txt"], b"content number 1");
        assert!(server.closes >= 1);
    }

    #[test]
    fn test_connect_tries_modes_most_secure_first() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        server.lock().unwrap().accepted_ssl = Some(SslSupportMode::None);
        let mut files = pack_list(&create_sources(temp.path()));

        archiver(&server).archive_file_set(&mut files, &OperationContext::new()).unwrap();
        let connects = server.lock().unwrap().connects.clone();
        let modes: Vec<SslSupportMode> = connects.iter().map(|c| c.1).collect();
        assert_eq!(modes, vec![SslSupportMode::Implicit, SslSupportMode::Explicit, SslSupportMode::None]);
        assert!(connects.iter().all(|c| c.0 == 2024 && c.2 == DataConnectionMode::Passive));
    }

    #[test]
    fn test_connect_failure_lists_every_attempt() {
        let server = FakeServer::new();
        server.lock().unwrap().unreachable = true;
        let mut checks = vec![FileToCheck::new("ftp://localhost/", "file1.txt")];

        let result = archiver(&server).check_file_set(&mut checks, &OperationContext::new());
        assert!(result.is_err());
        let connects = server.lock().unwrap().connects.clone();
        assert_eq!(connects.len(), 6);
        assert_eq!(connects[0].0, 990);
        assert_eq!(connects[1].0, 21);
        assert_eq!(connects[3].2, DataConnectionMode::Active);
    }

    #[test]
    fn test_malformed_address_fails_before_connecting() {
        let server = FakeServer::new();
        let mut checks = vec![FileToCheck::new("ftpa://localhost/", "file1.txt")];
        let result = archiver(&server).check_file_set(&mut checks, &OperationContext::new());
        assert!(matches!(result, Err(ArchiverError::Failed { .. })));
        assert!(server.lock().unwrap().connects.is_empty());
    }

    #[test]
    fn test_check_extract_round_trip() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let sources = create_sources(temp.path());
        let ftp = archiver(&server);
        let ctx = OperationContext::new();
        ftp.archive_file_set(&mut pack_list(&sources), &ctx).unwrap();
        server.lock().unwrap().files.insert("/empty.txt".to_string(), Vec::new());

        let mut checks = vec![
            FileToCheck::new(URI, "subfolder2/file4.txt"),
            FileToCheck::new(URI, "random.name"),
            FileToCheck::new(URI, "empty.txt"),
        ];
        assert_eq!(ftp.check_file_set(&mut checks, &ctx).unwrap(), 1);
        assert!(checks[0].processed);

        let out = temp.path().join("out");
        let mut extracts = vec![
            FileToExtract::new(URI, "subfolder1/file2.txt", out.join("sub/file2.txt")),
            FileToExtract::new(URI, "random.name", out.join("random.name")),
        ];
        assert_eq!(ftp.extract_file_set(&mut extracts, &ctx).unwrap(), 1);
        assert_eq!(fs::read(out.join("sub/file2.txt")).unwrap(), fs::read(&sources[1]).unwrap());
    }

    #[test]
    fn test_move_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let ftp = archiver(&server);
        let ctx = OperationContext::new();
        ftp.archive_file_set(&mut pack_list(&create_sources(temp.path())), &ctx).unwrap();

        let mut moves = vec![
            FileToMove::new(URI, "file1.txt", "subfolder2/file4.txt"),
            FileToMove::new(URI, "random.name", "random.name_move"),
        ];
        assert_eq!(ftp.move_file_set(&mut moves, &ctx).unwrap(), 1);

        let server = server.lock().unwrap();
        assert!(!server.files.contains_key("/file1.txt"));
        assert_eq!(server.files["/subfolder2/file4.txt"], b"content number 1");
    }

    #[test]
    fn test_delete_skips_missing_and_unreachable() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let ftp = archiver(&server);
        let ctx = OperationContext::new();
        ftp.archive_file_set(&mut pack_list(&create_sources(temp.path())), &ctx).unwrap();

        let mut deletes = vec![FileToDelete::new(URI, "file1.txt"), FileToDelete::new(URI, "random.name")];
        assert_eq!(ftp.delete_file_set(&mut deletes, &ctx).unwrap(), 1);

        server.lock().unwrap().unreachable = true;
        let mut deletes = vec![FileToDelete::new("ftp://127.0.0.1:2025/", "file2.txt")];
        assert_eq!(ftp.delete_file_set(&mut deletes, &ctx).unwrap(), 0);
        assert!(!deletes[0].processed);
    }

    #[test]
    fn test_list_walks_directories() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let ftp = archiver(&server);
        let ctx = OperationContext::new();
        ftp.archive_file_set(&mut pack_list(&create_sources(temp.path())), &ctx).unwrap();

        let listed = ftp.list_files(URI, &ctx).unwrap();
        let mut names: Vec<String> = listed.iter().map(|f| f.path_in_archive.clone()).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["file1.txt", "subfolder1/bla bla/file3.txt", "subfolder1/file2.txt", "subfolder2/file4.txt"]
        );
        assert!(listed.iter().all(|f| f.archive_path == "ftp://127.0.0.1:2024"));
    }

    #[test]
    fn test_cancel_mid_upload_removes_remote_file() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let mut files = pack_list(&create_sources(temp.path()));

        let token = CancellationToken::new();
        let trigger = token.clone();
        let callback: ProgressCallback = Arc::new(move |_: &ProgressEvent| trigger.cancel());
        let ctx = OperationContext::new().with_cancellation(token).with_progress(callback);

        let result = archiver(&server).archive_file_set(&mut files, &ctx);
        assert!(matches!(result, Err(ArchiverError::Canceled)));
        assert_eq!(batch::count_processed(&files), 0);
        assert!(server.lock().unwrap().files.is_empty());
    }

    #[test]
    fn test_cancel_mid_download_removes_local_file() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let ftp = archiver(&server);
        ftp.archive_file_set(&mut pack_list(&create_sources(temp.path())), &OperationContext::new())
            .unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        let callback: ProgressCallback = Arc::new(move |_: &ProgressEvent| trigger.cancel());
        let ctx = OperationContext::new().with_cancellation(token).with_progress(callback);

        let out = temp.path().join("out/file1.txt");
        let mut extracts = vec![FileToExtract::new(URI, "file1.txt", &out)];
        let result = ftp.extract_file_set(&mut extracts, &ctx);
        assert!(matches!(result, Err(ArchiverError::Canceled)));
        assert!(!out.exists());
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let server = FakeServer::new();
        let listed = archiver(&server)
            .list_files("ftp://127.0.0.1:2024/does/not/exist", &OperationContext::new())
            .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_unexpected_replies_are_fatal() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let ftp = archiver(&server);
        let ctx = OperationContext::new();
        ftp.archive_file_set(&mut pack_list(&create_sources(temp.path())), &ctx).unwrap();
        let out = temp.path().join("out.txt");

        for operation in ["size", "get", "delete", "rename"] {
            server.lock().unwrap().failures = HashMap::from([(operation, 530)]);
            let result = match operation {
                "size" => ftp.check_file_set(&mut vec![FileToCheck::new(URI, "file1.txt")], &ctx),
                "get" => ftp.extract_file_set(&mut vec![FileToExtract::new(URI, "file1.txt", &out)], &ctx),
                "delete" => ftp.delete_file_set(&mut vec![FileToDelete::new(URI, "file1.txt")], &ctx),
                _ => ftp.move_file_set(&mut vec![FileToMove::new(URI, "file1.txt", "renamed.txt")], &ctx),
            };
            assert!(matches!(result, Err(ArchiverError::Failed { .. })), "{}", operation);
        }

        let server = server.lock().unwrap();
        assert!(server.files.contains_key("/file1.txt"));
        assert!(!server.files.contains_key("/renamed.txt"));
        assert!(!out.exists());
    }

    #[test]
    fn test_failed_replace_is_fatal() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        let ftp = archiver(&server);
        let ctx = OperationContext::new();
        ftp.archive_file_set(&mut pack_list(&create_sources(temp.path())), &ctx).unwrap();

        server.lock().unwrap().failures = HashMap::from([("delete", 450)]);
        let mut moves = vec![FileToMove::new(URI, "file1.txt", "subfolder2/file4.txt")];
        let result = ftp.move_file_set(&mut moves, &ctx);
        assert!(matches!(result, Err(ArchiverError::Failed { .. })));
        assert!(!moves[0].processed);

        let server = server.lock().unwrap();
        assert_eq!(server.files["/file1.txt"], b"content number 1");
        assert_eq!(server.files["/subfolder2/file4.txt"], b"content number 4");
    }

    #[test]
    fn test_failed_upload_retry_is_fatal() {
        let temp = TempDir::new().unwrap();
        let server = FakeServer::new();
        server.lock().unwrap().failures = HashMap::from([("put", 451)]);
        let mut files = pack_list(&create_sources(temp.path()));

        let result = archiver(&server).archive_file_set(&mut files, &OperationContext::new());
        assert!(matches!(result, Err(ArchiverError::Failed { .. })));
        assert_eq!(batch::count_processed(&files), 0);
        assert!(server.lock().unwrap().files.is_empty());
    }

    #[test]
    fn test_servers_are_used_concurrently() {
        let slow = FakeServer::new();
        let fast = FakeServer::new();
        let release = Arc::new(AtomicBool::new(false));
        slow.lock().unwrap().files.insert("/a.txt".to_string(), b"a".to_vec());
        slow.lock().unwrap().hold_size_until = Some(Arc::clone(&release));
        fast.lock().unwrap().files.insert("/b.txt".to_string(), b"b".to_vec());

        // clients are created in order of first use: the slow server first
        let servers = vec![Arc::clone(&slow), Arc::clone(&fast)];
        let created = AtomicUsize::new(0);
        let ftp = Arc::new(FtpArchiver::new(move || -> Box<dyn FtpClient> {
            let server = &servers[created.fetch_add(1, Ordering::SeqCst) % servers.len()];
            Box::new(FakeClient {
                server: Arc::clone(server),
                connected: false,
                cwd: "/".to_string(),
            })
        }));

        let background = {
            let ftp = Arc::clone(&ftp);
            thread::spawn(move || {
                let mut checks = vec![FileToCheck::new("ftp://slow.example/", "a.txt")];
                ftp.check_file_set(&mut checks, &OperationContext::new())
            })
        };
        while slow.lock().unwrap().connects.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }

        let mut checks = vec![FileToCheck::new("ftp://fast.example/", "b.txt")];
        assert_eq!(ftp.check_file_set(&mut checks, &OperationContext::new()).unwrap(), 1);
        release.store(true, Ordering::SeqCst);

        assert_eq!(background.join().unwrap().unwrap(), 1);
    }
}
