//! Generic HTTP file servers (`PUT` / `GET` / `DELETE` on file URLs)

pub mod transport;

use reqwest::Url;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::core::archiver::{ArchiverDelete, ArchiverExtract, ArchiverPack};
use crate::core::batch::{self, OperationContext};
use crate::models::error::quote;
use crate::models::{
    ArchivedFile, ArchiverError, Credentials, FileToArchive, FileToDelete, FileToExtract, HttpOptions,
    ProxySettings, Result,
};
use crate::utils::path::normalize_relative;
use crate::utils::progress::ProgressEmitter;

pub use transport::{HttpError, HttpResponse, HttpTransport, ReqwestTransport};

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;
const STATUS_NO_CONTENT: u16 = 204;
const STATUS_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Upload,
    Download,
    Delete,
}

impl Action {
    fn name(self) -> &'static str {
        match self {
            Action::Upload => "upload",
            Action::Download => "download",
            Action::Delete => "delete",
        }
    }
}

/// URL of an entry under the server base URL
///
/// Each path segment is percent-encoded.
pub fn entry_url(base_url: &str, path_in_archive: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ArchiverError::wrap(format!("Invalid HTTP base url {}", quote(base_url)), e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ArchiverError::new(format!(
            "Invalid HTTP base url {}, the scheme should be http or https",
            quote(base_url)
        )));
    }

    let relative = normalize_relative(path_in_archive);
    url.path_segments_mut()
        .map_err(|_| ArchiverError::new(format!("Invalid HTTP base url {}", quote(base_url))))?
        .pop_if_empty()
        .extend(relative.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// Byte-weighted progress over a whole batch
///
/// Falls back to the count of completed files when no size is known.
struct ByteProgress<'e, 'a> {
    emitter: &'e ProgressEmitter<'a>,
    bytes_total: u64,
    bytes_done: u64,
    /// Sizes were not known beforehand and are learned from the responses
    learn_sizes: bool,
}

impl<'e, 'a> ByteProgress<'e, 'a> {
    fn transferred(&mut self, archive_path: &str, relative_path: &str, delta: u64) {
        self.bytes_done += delta;
        if self.bytes_total > 0 {
            self.emitter
                .emit_ratio(archive_path, relative_path, self.bytes_done as f64, self.bytes_total as f64);
        }
    }

    fn file_done(&mut self, archive_path: &str, relative_path: &str, files_done: usize) {
        if self.bytes_total > 0 {
            self.emitter
                .emit_ratio(archive_path, relative_path, self.bytes_done as f64, self.bytes_total as f64);
        } else {
            self.emitter.emit_files_done(archive_path, relative_path, files_done);
        }
    }
}

/// Archiver for HTTP file servers; the archive path is the server base URL
///
/// Supports pack, extract and delete.
pub struct HttpFileServerArchiver {
    transport: Box<dyn HttpTransport>,
    /// Settings of the `reqwest` transport, `None` for a caller-provided transport
    options: Option<HttpOptions>,
}

impl HttpFileServerArchiver {
    /// Archiver using `reqwest` with the given proxy, authentication and headers
    pub fn new(options: &HttpOptions) -> Result<Self> {
        Ok(Self {
            transport: Box::new(build_transport(options)?),
            options: Some(options.clone()),
        })
    }

    pub fn with_transport(transport: impl HttpTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            options: None,
        }
    }

    /// Current settings, `None` when a custom transport is used
    pub fn options(&self) -> Option<&HttpOptions> {
        self.options.as_ref()
    }

    /// Send every request through the proxy at `url` (`http://host:port/`)
    pub fn set_proxy(&mut self, url: &str, username: Option<&str>, password: Option<&str>) -> Result<()> {
        self.reconfigure(|options| {
            options.proxy = Some(ProxySettings {
                url: url.to_string(),
                username: username.map(str::to_string),
                password: password.map(str::to_string),
            })
        })
    }

    pub fn set_basic_authentication(&mut self, username: &str, password: Option<&str>) -> Result<()> {
        self.reconfigure(|options| {
            options.basic_auth = Some(Credentials {
                username: username.to_string(),
                password: password.map(str::to_string),
            })
        })
    }

    /// Replace the extra headers sent with every request
    pub fn set_headers(&mut self, headers: HashMap<String, String>) -> Result<()> {
        self.reconfigure(|options| options.headers = headers)
    }

    /// Apply `change` and rebuild the transport; settings are unchanged on failure
    fn reconfigure(&mut self, change: impl FnOnce(&mut HttpOptions)) -> Result<()> {
        let mut options = self.options.clone().ok_or_else(|| {
            ArchiverError::new("The HTTP archiver uses a custom transport, configure the transport instead")
        })?;
        change(&mut options);
        self.transport = Box::new(build_transport(&options)?);
        self.options = Some(options);
        Ok(())
    }

    /// Total bytes the batch will move, 0 when unknown
    fn total_size<T: ArchivedFile>(&self, files: &[T], action: Action, source: impl Fn(&T) -> Option<&Path>) -> Result<u64> {
        let mut total = 0u64;
        for file in files {
            match action {
                Action::Upload => {
                    if let Some(metadata) = source(file).and_then(|p| fs::metadata(p).ok()).filter(|m| m.is_file()) {
                        total += metadata.len();
                    }
                }
                Action::Download => {
                    let url = entry_url(file.archive_path(), file.path_in_archive())?;
                    match self.transport.file_size(&url) {
                        Ok(size) => total += size.unwrap_or(0),
                        Err(HttpError::Unreachable(reason)) => {
                            log::debug!("Size of {} unknown: {}", url, reason);
                        }
                        Err(e) => return Err(ArchiverError::wrap(format!("Failed to get the size of {}", url), e)),
                    }
                }
                Action::Delete => {}
            }
        }
        Ok(total)
    }

    fn upload(&self, file: &FileToArchive, url: &Url, progress: &mut ByteProgress<'_, '_>, ctx: &OperationContext) -> Result<bool> {
        if !file.source_path.is_file() {
            log::debug!("Skipping missing file {}", file.source_path.display());
            return Ok(false);
        }
        let size = fs::metadata(&file.source_path).map(|m| m.len()).unwrap_or(0);

        let mut reported = 0u64;
        let response = self.transport.put_file(url, &file.source_path, &mut |done: u64| {
            progress.transferred(&file.archive_path, &file.path_in_archive, done.saturating_sub(reported));
            reported = reported.max(done);
            !ctx.is_canceled()
        });
        let response = match response {
            Ok(response) => response,
            Err(_) if ctx.is_canceled() => return Err(ArchiverError::Canceled),
            Err(e) => return Err(ArchiverError::wrap(format!("Failed to send {}", quote(file.source_path.to_string_lossy())), e)),
        };
        progress.transferred(&file.archive_path, &file.path_in_archive, size.saturating_sub(reported));

        match response.status {
            STATUS_OK | STATUS_CREATED => Ok(true),
            _ => Err(server_refused(&response, url)),
        }
    }

    fn download(&self, file: &FileToExtract, url: &Url, progress: &mut ByteProgress<'_, '_>, ctx: &OperationContext) -> Result<bool> {
        if let Some(parent) = file.extraction_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ArchiverError::wrap(format!("Failed to create directory {}", quote(parent.to_string_lossy())), e)
            })?;
        }

        let mut reported = 0u64;
        let mut counted = false;
        let response = self.transport.download_file(url, &file.extraction_path, &mut |done: u64, total: Option<u64>| {
            if progress.learn_sizes && !counted {
                progress.bytes_total += total.unwrap_or(0);
                counted = true;
            }
            progress.transferred(&file.archive_path, &file.path_in_archive, done.saturating_sub(reported));
            reported = reported.max(done);
            !ctx.is_canceled()
        });

        match response {
            Ok(response) => match response.status {
                STATUS_OK => Ok(true),
                STATUS_NOT_FOUND => Ok(false),
                _ => Err(server_refused(&response, url)),
            },
            Err(HttpError::Unreachable(reason)) => {
                log::warn!("Skipping {}: {}", url, reason);
                Ok(false)
            }
            Err(e) => {
                if ctx.is_canceled() {
                    // unfinished download
                    let _ = fs::remove_file(&file.extraction_path);
                    return Err(ArchiverError::Canceled);
                }
                Err(ArchiverError::wrap(format!("Failed to get {}", url), e))
            }
        }
    }

    fn delete(&self, url: &Url) -> Result<bool> {
        match self.transport.delete_file(url) {
            Ok(response) => match response.status {
                STATUS_OK | STATUS_NO_CONTENT => Ok(true),
                STATUS_NOT_FOUND => Ok(false),
                _ => Err(server_refused(&response, url)),
            },
            Err(HttpError::Unreachable(reason)) => {
                log::warn!("Skipping {}: {}", url, reason);
                Ok(false)
            }
            Err(e) => Err(ArchiverError::wrap(format!("Failed to delete {}", url), e)),
        }
    }

    /// Run `step` on every file, grouped by server
    fn run<T, F>(&self, files: &mut [T], ctx: &OperationContext, action: Action, total_size: u64, mut step: F) -> Result<usize>
    where
        T: ArchivedFile,
        F: FnMut(&mut T, &Url, &mut ByteProgress<'_, '_>) -> Result<bool>,
    {
        batch::reset_processed(files);
        let emitter = ctx.emitter(files.len());
        let mut progress = ByteProgress {
            emitter: &emitter,
            bytes_total: total_size,
            bytes_done: 0,
            learn_sizes: action == Action::Download && total_size == 0,
        };
        let mut files_done = 0usize;

        for (archive_path, group) in batch::group_by_archive(files) {
            log::debug!("Running {} of {} file(s) at {}", action.name(), group.len(), archive_path);
            let group_failure = |e: ArchiverError| {
                ArchiverError::wrap(format!("Failed to {} at {}", action.name(), quote(&archive_path)), e)
            };

            for file in group {
                ctx.check_canceled()?;
                let url = entry_url(&archive_path, file.path_in_archive()).map_err(group_failure)?;
                if step(&mut *file, &url, &mut progress).map_err(group_failure)? {
                    file.set_processed(true);
                    files_done += 1;
                    progress.file_done(&archive_path, file.path_in_archive(), files_done);
                }
            }
        }

        log::info!("{} done for {} of {} file(s) on HTTP servers", action.name(), files_done, files.len());
        Ok(files_done)
    }
}

fn build_transport(options: &HttpOptions) -> Result<ReqwestTransport> {
    ReqwestTransport::new(options).map_err(|e| ArchiverError::wrap("Failed to set up the HTTP client", e))
}

fn server_refused(response: &HttpResponse, url: &Url) -> ArchiverError {
    ArchiverError::new(format!("The server returned {}: {} for {}", response.status, response.reason, url))
}

impl ArchiverPack for HttpFileServerArchiver {
    fn archive_file_set(&self, files: &mut [FileToArchive], ctx: &OperationContext) -> Result<usize> {
        let total = self
            .total_size(files, Action::Upload, |f| Some(f.source_path.as_path()))
            .map_err(|e| ArchiverError::wrap("Failed to assess the total file size to handle during upload", e))?;
        self.run(files, ctx, Action::Upload, total, |file, url, progress| self.upload(file, url, progress, ctx))
    }
}

impl ArchiverExtract for HttpFileServerArchiver {
    fn extract_file_set(&self, files: &mut [FileToExtract], ctx: &OperationContext) -> Result<usize> {
        let total = self
            .total_size(files, Action::Download, |_| None)
            .map_err(|e| ArchiverError::wrap("Failed to assess the total file size to handle during download", e))?;
        self.run(files, ctx, Action::Download, total, |file, url, progress| self.download(file, url, progress, ctx))
    }
}

impl ArchiverDelete for HttpFileServerArchiver {
    fn delete_file_set(&self, files: &mut [FileToDelete], ctx: &OperationContext) -> Result<usize> {
        self.run(files, ctx, Action::Delete, 0, |_, url, _| self.delete(url))
    }
}
