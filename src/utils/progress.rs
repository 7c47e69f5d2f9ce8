use serde::Serialize;
use std::cell::Cell;
use std::sync::Arc;

/// Progress of a batch operation
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub archive_path: String,
    /// Item currently in flight
    pub relative_path_in_archive: String,
    /// Global percentage for the whole batch, 0 - 100
    pub percentage_done: f64,
}

/// Callback receiving progress events
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Round a percentage to 2 decimal places
pub fn round_percentage(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Emits progress for one batch call
///
/// Percentages are global to the batch, clamped to `[0, 100]` and never
/// lower than the previously emitted value.
pub struct ProgressEmitter<'a> {
    callback: Option<&'a ProgressCallback>,
    total_files: usize,
    last: Cell<f64>,
}

impl<'a> ProgressEmitter<'a> {
    pub fn new(callback: Option<&'a ProgressCallback>, total_files: usize) -> Self {
        Self {
            callback,
            total_files,
            last: Cell::new(0.0),
        }
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    /// Emit progress for a file partially transferred
    ///
    /// # Arguments
    /// * `files_done` - Files fully completed before the current one
    /// * `bytes_done` / `bytes_total` - Transfer state of the current file
    pub fn emit_bytes(
        &self,
        archive_path: &str,
        relative_path: &str,
        files_done: usize,
        bytes_done: u64,
        bytes_total: Option<u64>,
    ) {
        let fraction = match bytes_total {
            Some(total) if total > 0 => (bytes_done as f64 / total as f64).min(1.0),
            _ => 0.0,
        };
        self.emit_ratio(archive_path, relative_path, files_done as f64 + fraction, self.total_files as f64);
    }

    /// Emit progress after a file completed
    pub fn emit_files_done(&self, archive_path: &str, relative_path: &str, files_done: usize) {
        self.emit_ratio(archive_path, relative_path, files_done as f64, self.total_files as f64);
    }

    /// Emit progress weighted by bytes over the whole batch
    pub fn emit_ratio(&self, archive_path: &str, relative_path: &str, done: f64, total: f64) {
        let callback = match self.callback {
            Some(callback) => callback,
            None => return,
        };
        if total <= 0.0 {
            return;
        }
        let percentage = round_percentage(done / total * 100.0).clamp(0.0, 100.0);
        let percentage = percentage.max(self.last.get());
        self.last.set(percentage);

        callback(&ProgressEvent {
            archive_path: archive_path.to_string(),
            relative_path_in_archive: relative_path.to_string(),
            percentage_done: percentage,
        });
    }
}
