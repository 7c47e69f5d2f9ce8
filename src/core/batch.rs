//! Pieces shared by every backend's batch loop: grouping by archive,
//! cancellation, progress context and chunked copies.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{ArchivedFile, ArchiverError, Result};
use crate::utils::progress::{ProgressCallback, ProgressEmitter};

/// Buffer size used for raw byte copies
pub const BUFFER_SIZE: usize = 1024 * 1024;

/// Cooperative cancellation signal
///
/// Clones share the same flag, so a token handed to an operation can be
/// tripped from another thread or from a progress callback.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Per-call context threaded through every batch operation
#[derive(Clone, Default)]
pub struct OperationContext {
    cancel: Option<CancellationToken>,
    progress: Option<ProgressCallback>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Install or clear (`None`) the cancellation token
    pub fn set_cancellation(&mut self, token: Option<CancellationToken>) {
        self.cancel = token;
    }

    /// Install or clear (`None`) the progress callback
    pub fn set_progress(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
    }

    /// Fail with [`ArchiverError::Canceled`] once the token is tripped
    pub fn check_canceled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_canceled() => Err(ArchiverError::Canceled),
            _ => Ok(()),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.check_canceled().is_err()
    }

    /// Progress emitter for a batch of `total_files` descriptors
    pub fn emitter(&self, total_files: usize) -> ProgressEmitter<'_> {
        ProgressEmitter::new(self.progress.as_ref(), total_files)
    }
}

/// Force every descriptor back to unprocessed
pub fn reset_processed<T: ArchivedFile>(files: &mut [T]) {
    files.iter_mut().for_each(|f| f.set_processed(false));
}

/// Number of descriptors flagged as processed
pub fn count_processed<T: ArchivedFile>(files: &[T]) -> usize {
    files.iter().filter(|f| f.processed()).count()
}

/// Group descriptors by archive path
///
/// Groups come in order of first appearance and keep the input order of
/// their items.
pub fn group_by_archive<T: ArchivedFile>(files: &mut [T]) -> Vec<(String, Vec<&mut T>)> {
    let mut groups: Vec<(String, Vec<&mut T>)> = Vec::new();
    for file in files.iter_mut() {
        let key = file.archive_path().to_string();
        match groups.iter().position(|(archive, _)| *archive == key) {
            Some(index) => groups[index].1.push(file),
            None => groups.push((key, vec![file])),
        }
    }
    groups
}

/// Copy `reader` into `writer` by chunks of [`BUFFER_SIZE`]
///
/// `on_chunk` receives the cumulated byte count after each chunk.
/// Cancellation is checked after every chunk.
///
/// # Returns
/// * Number of bytes copied
pub fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    ctx: &OperationContext,
    mut on_chunk: F,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: FnMut(u64),
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiverError::wrap("Failed to read source data", e)),
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|e| ArchiverError::wrap("Failed to write target data", e))?;
        total += read as u64;
        on_chunk(total);
        ctx.check_canceled()?;
    }
    writer
        .flush()
        .map_err(|e| ArchiverError::wrap("Failed to write target data", e))?;
    Ok(total)
}
