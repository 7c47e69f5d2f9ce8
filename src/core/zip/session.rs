use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::batch::{self, OperationContext};
use crate::models::error::quote;
use crate::models::{ArchiverError, CompressionLevel, Result};
use crate::utils::path::entry_key;

/// Entry of an existing archive, as seen when the session was opened
#[derive(Debug, Clone)]
pub struct ExistingEntry {
    pub index: usize,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Local>>,
}

/// Open a zip archive read-only
pub fn open_read(archive_path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive_path).map_err(|e| {
        ArchiverError::wrap(format!("Failed to open ZIP archive {}", quote(archive_path.to_string_lossy())), e)
    })?;
    ZipArchive::new(file).map_err(|e| {
        ArchiverError::wrap(format!("Failed to read ZIP archive {}", quote(archive_path.to_string_lossy())), e)
    })
}

/// Snapshot of every entry of an archive
pub fn read_entries(archive: &mut ZipArchive<File>) -> Result<Vec<ExistingEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive
            .by_index_raw(index)
            .map_err(|e| ArchiverError::wrap(format!("Failed to read file at index {}", index), e))?;
        entries.push(ExistingEntry {
            index,
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            size: file.size(),
            last_modified: file.last_modified().and_then(to_local_time),
        });
    }
    Ok(entries)
}

/// Update session on one zip archive
///
/// The new container is written to a temporary file next to the archive.
/// Entries added through the session are written first; `commit` then
/// raw-copies every existing entry that was neither replaced nor removed
/// and swaps the temporary file over the archive. Dropping the session
/// without committing leaves the archive untouched.
pub struct ZipUpdate {
    archive_path: PathBuf,
    existing: Option<ZipArchive<File>>,
    entries: Vec<ExistingEntry>,
    writer: ZipWriter<NamedTempFile>,
    level: CompressionLevel,
    /// Keys of entries written or removed during the session
    superseded: HashSet<String>,
    written: HashSet<String>,
    dirty: bool,
}

impl ZipUpdate {
    /// Open `archive_path` for update, creating its directory when needed
    pub fn open(archive_path: &Path, level: CompressionLevel) -> Result<Self> {
        let directory = match archive_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory).map_err(|e| {
            ArchiverError::wrap(format!("Failed to create directory {}", quote(directory.to_string_lossy())), e)
        })?;

        let (existing, entries) = if archive_path.is_file() {
            let mut archive = open_read(archive_path)?;
            let entries = read_entries(&mut archive)?;
            (Some(archive), entries)
        } else {
            (None, Vec::new())
        };

        let temp = tempfile::Builder::new()
            .prefix(".~zip")
            .tempfile_in(&directory)
            .map_err(|e| ArchiverError::wrap("Failed to create temporary archive", e))?;

        Ok(Self {
            archive_path: archive_path.to_path_buf(),
            existing,
            entries,
            writer: ZipWriter::new(temp),
            level,
            superseded: HashSet::new(),
            written: HashSet::new(),
            dirty: false,
        })
    }

    /// Existing file entry named `name`, unless this session replaced or removed it
    pub fn live_entry(&self, name: &str) -> Option<ExistingEntry> {
        let key = entry_key(name);
        if self.superseded.contains(&key) {
            return None;
        }
        self.entries
            .iter()
            .find(|e| !e.is_dir && entry_key(&e.name) == key)
            .cloned()
    }

    /// Add `source` as entry `name`, replacing any same-named entry
    ///
    /// On failure (cancellation included) the partial entry is dropped.
    pub fn add_file<F>(&mut self, name: &str, source: &Path, ctx: &OperationContext, on_chunk: F) -> Result<()>
    where
        F: FnMut(u64),
    {
        let key = entry_key(name);
        if self.written.contains(&key) {
            return Err(ArchiverError::new(format!("Entry {} was already written in this update", quote(name))));
        }

        let mut reader = File::open(source).map_err(|e| ArchiverError::wrap("Failed to open source file", e))?;
        let metadata = reader
            .metadata()
            .map_err(|e| ArchiverError::wrap("Failed to read source metadata", e))?;

        let mut options = entry_options(self.level).large_file(metadata.len() >= u32::MAX as u64);
        if let Some(time) = metadata.modified().ok().map(DateTime::<Local>::from).and_then(to_zip_time) {
            options = options.last_modified_time(time);
        }

        self.writer
            .start_file(name, options)
            .map_err(|e| ArchiverError::wrap(format!("Failed to start file {} in archive", quote(name)), e))?;
        self.dirty = true;

        if let Err(e) = batch::copy_with_progress(&mut reader, &mut self.writer, ctx, on_chunk) {
            if let Err(abort) = self.writer.abort_file() {
                log::warn!("Failed to drop partial entry {}: {}", name, abort);
            }
            return Err(e);
        }

        self.superseded.insert(key.clone());
        self.written.insert(key);
        Ok(())
    }

    /// Write the existing entry at `index` to `target`
    ///
    /// A canceled extraction removes the partially written target.
    pub fn extract_entry<F>(&mut self, index: usize, target: &Path, ctx: &OperationContext, on_chunk: F) -> Result<()>
    where
        F: FnMut(u64),
    {
        let archive = self
            .existing
            .as_mut()
            .ok_or_else(|| ArchiverError::new("The archive has no existing entries"))?;
        extract_to(archive, index, target, ctx, on_chunk)
    }

    /// Drop the entry named `name` from the archive
    pub fn remove(&mut self, name: &str) {
        self.superseded.insert(entry_key(name));
        self.dirty = true;
    }

    /// Keep an existing entry that was removed earlier in this session
    ///
    /// Entries written by the session stay superseded.
    pub fn restore(&mut self, name: &str) {
        let key = entry_key(name);
        if !self.written.contains(&key) {
            self.superseded.remove(&key);
        }
    }

    /// Write the remaining entries and replace the archive
    pub fn commit(self) -> Result<()> {
        let ZipUpdate {
            archive_path,
            mut existing,
            entries,
            mut writer,
            superseded,
            dirty,
            ..
        } = self;

        if !dirty && existing.is_some() {
            return Ok(());
        }

        if let Some(archive) = existing.as_mut() {
            for entry in entries.iter().filter(|e| !superseded.contains(&entry_key(&e.name))) {
                let file = archive
                    .by_index_raw(entry.index)
                    .map_err(|e| ArchiverError::wrap(format!("Failed to read entry {}", quote(&entry.name)), e))?;
                writer
                    .raw_copy_file(file)
                    .map_err(|e| ArchiverError::wrap(format!("Failed to copy entry {}", quote(&entry.name)), e))?;
            }
        }
        drop(existing);

        let temp = writer
            .finish()
            .map_err(|e| ArchiverError::wrap("Failed to finalize ZIP archive", e))?;
        temp.persist(&archive_path).map_err(|e| {
            ArchiverError::wrap(format!("Failed to replace ZIP archive {}", quote(archive_path.to_string_lossy())), e.error)
        })?;
        Ok(())
    }
}

/// Extract entry `index` of `archive` to `target`, overwriting it
pub fn extract_to<F>(
    archive: &mut ZipArchive<File>,
    index: usize,
    target: &Path,
    ctx: &OperationContext,
    on_chunk: F,
) -> Result<()>
where
    F: FnMut(u64),
{
    let mut entry = archive
        .by_index(index)
        .map_err(|e| ArchiverError::wrap(format!("Failed to read file at index {}", index), e))?;
    let mut output = File::create(target).map_err(|e| {
        ArchiverError::wrap(format!("Failed to create output file {}", quote(target.to_string_lossy())), e)
    })?;

    if let Err(e) = batch::copy_with_progress(&mut entry, &mut output, ctx, on_chunk) {
        drop(output);
        if e.is_canceled() {
            // unfinished extraction
            let _ = fs::remove_file(target);
        }
        return Err(e);
    }
    Ok(())
}

/// Write options for a compression level
fn entry_options(level: CompressionLevel) -> FileOptions<'static, ()> {
    match level {
        CompressionLevel::None => FileOptions::<()>::default().compression_method(CompressionMethod::Stored),
        CompressionLevel::Fastest => FileOptions::<()>::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(1)),
        CompressionLevel::Optimal => FileOptions::<()>::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9)),
    }
}

fn to_local_time(time: zip::DateTime) -> Option<DateTime<Local>> {
    let naive = NaiveDate::from_ymd_opt(time.year() as i32, time.month() as u32, time.day() as u32)?
        .and_hms_opt(time.hour() as u32, time.minute() as u32, time.second() as u32)?;
    Local.from_local_datetime(&naive).earliest()
}

fn to_zip_time(time: DateTime<Local>) -> Option<zip::DateTime> {
    let year = u16::try_from(time.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .ok()
}
