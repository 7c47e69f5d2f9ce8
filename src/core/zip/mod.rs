//! Zip archives on the local filesystem

mod session;
mod staging;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::core::archiver::{
    ArchiverCheck, ArchiverDelete, ArchiverExtract, ArchiverList, ArchiverMove, ArchiverPack,
};
use crate::core::batch::{self, OperationContext};
use crate::models::error::quote;
use crate::models::{
    ArchiverError, CompressionLevel, FileInArchive, FileToArchive, FileToCheck, FileToDelete,
    FileToExtract, FileToMove, Result,
};
use crate::utils::path::{entry_key, normalize_relative};
use crate::utils::progress::ProgressEmitter;

use session::{ExistingEntry, ZipUpdate};
use staging::StagingDir;

/// Archiver storing files as entries of zip archives
///
/// Entry names are compared case-insensitively. Each archive is opened once
/// per batch call and rewritten only when its content changed.
pub struct ZipArchiver {
    level: CompressionLevel,
}

impl ZipArchiver {
    pub fn new() -> Self {
        Self {
            level: CompressionLevel::default(),
        }
    }

    pub fn with_compression_level(level: CompressionLevel) -> Self {
        Self { level }
    }

    /// Compression used for entries written from now on
    pub fn set_compression_level(&mut self, level: CompressionLevel) {
        self.level = level;
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.level
    }

    fn pack_group(
        &self,
        archive_path: &str,
        group: &mut [&mut FileToArchive],
        ctx: &OperationContext,
        emitter: &ProgressEmitter<'_>,
        files_done: &mut usize,
    ) -> Result<()> {
        let mut update = ZipUpdate::open(Path::new(archive_path), self.level)?;
        // last descriptor writing each entry; earlier ones are overwritten in the same batch
        let last_writes: HashMap<String, usize> = group
            .iter()
            .enumerate()
            .filter(|(_, f)| f.source_path.is_file())
            .map(|(position, f)| (entry_key(&f.path_in_archive), position))
            .collect();
        let mut overwritten: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outcome = Ok(());

        for position in 0..group.len() {
            if let Err(e) = ctx.check_canceled() {
                outcome = Err(e);
                break;
            }
            let file = &*group[position];
            if !file.source_path.is_file() {
                log::debug!("Skipping missing file {}", file.source_path.display());
                continue;
            }

            let name = normalize_relative(&file.path_in_archive);
            let key = entry_key(&name);
            if last_writes.get(&key) != Some(&position) {
                log::debug!("Entry {} is written again later in the batch", name);
                overwritten.entry(key).or_default().push(position);
                continue;
            }

            let total = fs::metadata(&file.source_path).map(|m| m.len()).unwrap_or(0);
            let done_before = *files_done;
            let result = update.add_file(&name, &file.source_path, ctx, |done| {
                if done != total {
                    emitter.emit_bytes(archive_path, &name, done_before, done, Some(total));
                }
            });

            if let Err(e) = result {
                outcome = Err(if e.is_canceled() {
                    e
                } else {
                    ArchiverError::wrap(
                        format!("Failed to pack {} to {}", quote(file.source_path.to_string_lossy()), quote(archive_path)),
                        e,
                    )
                });
                break;
            }

            for earlier in overwritten.remove(&key).unwrap_or_default() {
                group[earlier].processed = true;
                *files_done += 1;
            }
            group[position].processed = true;
            *files_done += 1;
            emitter.emit_files_done(archive_path, &group[position].path_in_archive, *files_done);
        }

        finish_update(update, archive_path, outcome)
    }

    fn move_group(
        &self,
        archive_path: &str,
        group: &mut [&mut FileToMove],
        ctx: &OperationContext,
        emitter: &ProgressEmitter<'_>,
        files_done: &mut usize,
    ) -> Result<()> {
        let mut update = ZipUpdate::open(Path::new(archive_path), self.level)?;
        // last move onto each destination; earlier ones only lose their source once it succeeded
        let last_moves: HashMap<String, usize> = group
            .iter()
            .enumerate()
            .filter(|(_, f)| update.live_entry(&f.path_in_archive).is_some())
            .map(|(position, f)| (entry_key(&f.new_path_in_archive), position))
            .collect();
        let mut overwritten: HashMap<String, Vec<(usize, ExistingEntry)>> = HashMap::new();
        let mut staging: Option<StagingDir> = None;
        let mut outcome = Ok(());

        for position in 0..group.len() {
            if let Err(e) = ctx.check_canceled() {
                outcome = Err(e);
                break;
            }
            let file = &*group[position];
            let entry = match update.live_entry(&file.path_in_archive) {
                Some(entry) => entry,
                None => {
                    log::debug!("Skipping missing entry {} in {}", file.path_in_archive, archive_path);
                    continue;
                }
            };

            let key = entry_key(&file.new_path_in_archive);
            if last_moves.get(&key) != Some(&position) {
                log::debug!("Destination {} is written again later in the batch", file.new_path_in_archive);
                overwritten.entry(key).or_default().push((position, entry));
                continue;
            }

            let done_before = *files_done;
            let result = move_entry(
                &mut update,
                &mut staging,
                archive_path,
                &entry,
                &file.new_path_in_archive,
                ctx,
                |done| {
                    if done != entry.size {
                        emitter.emit_bytes(archive_path, &file.new_path_in_archive, done_before, done, Some(entry.size));
                    }
                },
            );
            if let Err(e) = result {
                outcome = Err(if e.is_canceled() {
                    e
                } else {
                    ArchiverError::wrap(
                        format!(
                            "Failed to move {} to {} in {}",
                            quote(&file.path_in_archive),
                            quote(&file.new_path_in_archive),
                            quote(archive_path)
                        ),
                        e,
                    )
                });
                break;
            }

            for (earlier, source) in overwritten.remove(&key).unwrap_or_default() {
                if entry_key(&source.name) != key {
                    update.remove(&source.name);
                }
                group[earlier].processed = true;
                *files_done += 1;
            }
            group[position].processed = true;
            *files_done += 1;
            emitter.emit_files_done(archive_path, &group[position].new_path_in_archive, *files_done);
        }

        drop(staging);
        finish_update(update, archive_path, outcome)
    }
}

impl Default for ZipArchiver {
    fn default() -> Self {
        Self::new()
    }
}

/// Commit what was completed, then report the first failure
fn finish_update(update: ZipUpdate, archive_path: &str, outcome: Result<()>) -> Result<()> {
    let committed = update.commit();
    match (outcome, committed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => Err(ArchiverError::wrap(format!("Failed to update {}", quote(archive_path)), e)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(commit_error)) => {
            log::warn!("Failed to save completed entries of {}: {}", archive_path, commit_error);
            Err(e)
        }
    }
}

/// Re-insert `entry` under `new_name` through the staging directory
///
/// The source entry is kept when the re-insert fails.
fn move_entry<F>(
    update: &mut ZipUpdate,
    staging: &mut Option<StagingDir>,
    archive_path: &str,
    entry: &ExistingEntry,
    new_name: &str,
    ctx: &OperationContext,
    on_chunk: F,
) -> Result<()>
where
    F: FnMut(u64),
{
    if staging.is_none() {
        *staging = Some(StagingDir::new(Path::new(archive_path))?);
    }
    let staged = match staging.as_ref() {
        Some(dir) => dir.file_path(&normalize_relative(&entry.name))?,
        None => return Err(ArchiverError::new("Staging directory is not available")),
    };

    update.extract_entry(entry.index, &staged, ctx, |_| {})?;
    update.remove(&entry.name);
    let result = update.add_file(&normalize_relative(new_name), &staged, ctx, on_chunk);
    if result.is_err() {
        update.restore(&entry.name);
    }
    if let Err(e) = fs::remove_file(&staged) {
        log::debug!("Failed to remove staged file {}: {}", staged.display(), e);
    }
    result
}

/// Index of the file entries of an archive by entry key
fn index_entries(entries: &[ExistingEntry]) -> HashMap<String, &ExistingEntry> {
    let mut index = HashMap::with_capacity(entries.len());
    for entry in entries.iter().filter(|e| !e.is_dir) {
        index.entry(entry_key(&entry.name)).or_insert(entry);
    }
    index
}

impl ArchiverPack for ZipArchiver {
    fn archive_file_set(&self, files: &mut [FileToArchive], ctx: &OperationContext) -> Result<usize> {
        batch::reset_processed(files);
        let emitter = ctx.emitter(files.len());
        let mut files_done = 0usize;

        for (archive_path, mut group) in batch::group_by_archive(files) {
            log::debug!("Packing {} file(s) to {}", group.len(), archive_path);
            self.pack_group(&archive_path, &mut group, ctx, &emitter, &mut files_done)?;
        }

        log::info!("Packed {} of {} file(s) to zip archives", files_done, files.len());
        Ok(files_done)
    }
}

impl ArchiverExtract for ZipArchiver {
    fn extract_file_set(&self, files: &mut [FileToExtract], ctx: &OperationContext) -> Result<usize> {
        batch::reset_processed(files);
        let emitter = ctx.emitter(files.len());
        let mut files_done = 0usize;

        for (archive_path, group) in batch::group_by_archive(files) {
            ctx.check_canceled()?;
            if !Path::new(&archive_path).is_file() {
                log::debug!("Skipping missing archive {}", archive_path);
                continue;
            }

            for parent in group.iter().filter_map(|f| f.extraction_path.parent()) {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(|e| {
                        ArchiverError::wrap(format!("Failed to create directory {}", quote(parent.to_string_lossy())), e)
                    })?;
                }
            }

            let mut archive = session::open_read(Path::new(&archive_path))?;
            let entries = session::read_entries(&mut archive)?;
            let index = index_entries(&entries);

            for file in group {
                ctx.check_canceled()?;
                let entry = match index.get(&entry_key(&file.path_in_archive)) {
                    Some(entry) => *entry,
                    None => {
                        log::debug!("Skipping missing entry {} in {}", file.path_in_archive, archive_path);
                        continue;
                    }
                };

                let done_before = files_done;
                session::extract_to(&mut archive, entry.index, &file.extraction_path, ctx, |done| {
                    if done != entry.size {
                        emitter.emit_bytes(&archive_path, &file.path_in_archive, done_before, done, Some(entry.size));
                    }
                })
                .map_err(|e| {
                    ArchiverError::wrap(
                        format!(
                            "Failed to extract {} from {} to {}",
                            quote(&file.path_in_archive),
                            quote(&archive_path),
                            quote(file.extraction_path.to_string_lossy())
                        ),
                        e,
                    )
                })?;

                file.processed = true;
                files_done += 1;
                emitter.emit_files_done(&archive_path, &file.path_in_archive, files_done);
            }
        }

        log::info!("Extracted {} of {} file(s) from zip archives", files_done, files.len());
        Ok(files_done)
    }
}

impl ArchiverDelete for ZipArchiver {
    fn delete_file_set(&self, files: &mut [FileToDelete], ctx: &OperationContext) -> Result<usize> {
        batch::reset_processed(files);
        let emitter = ctx.emitter(files.len());
        let mut files_done = 0usize;

        for (archive_path, group) in batch::group_by_archive(files) {
            ctx.check_canceled()?;
            if !Path::new(&archive_path).is_file() {
                log::debug!("Skipping missing archive {}", archive_path);
                continue;
            }

            let mut update = ZipUpdate::open(Path::new(&archive_path), self.level)?;
            let mut outcome = Ok(());
            for file in group {
                if let Err(e) = ctx.check_canceled() {
                    outcome = Err(e);
                    break;
                }
                match update.live_entry(&file.path_in_archive) {
                    Some(entry) => update.remove(&entry.name),
                    None => {
                        log::debug!("Skipping missing entry {} in {}", file.path_in_archive, archive_path);
                        continue;
                    }
                }
                file.processed = true;
                files_done += 1;
                emitter.emit_files_done(&archive_path, &file.path_in_archive, files_done);
            }
            finish_update(update, &archive_path, outcome)?;
        }

        log::info!("Deleted {} of {} file(s) from zip archives", files_done, files.len());
        Ok(files_done)
    }
}

impl ArchiverMove for ZipArchiver {
    fn move_file_set(&self, files: &mut [FileToMove], ctx: &OperationContext) -> Result<usize> {
        batch::reset_processed(files);
        let emitter = ctx.emitter(files.len());
        let mut files_done = 0usize;

        for (archive_path, mut group) in batch::group_by_archive(files) {
            ctx.check_canceled()?;
            if !Path::new(&archive_path).is_file() {
                log::debug!("Skipping missing archive {}", archive_path);
                continue;
            }
            self.move_group(&archive_path, &mut group, ctx, &emitter, &mut files_done)?;
        }

        log::info!("Moved {} of {} file(s) in zip archives", files_done, files.len());
        Ok(files_done)
    }
}

impl ArchiverCheck for ZipArchiver {
    fn check_file_set(&self, files: &mut [FileToCheck], ctx: &OperationContext) -> Result<usize> {
        batch::reset_processed(files);
        let mut total = 0usize;

        for (archive_path, group) in batch::group_by_archive(files) {
            ctx.check_canceled()?;
            if !Path::new(&archive_path).is_file() {
                continue;
            }
            let mut archive = session::open_read(Path::new(&archive_path))?;
            let entries = session::read_entries(&mut archive)?;
            let index = index_entries(&entries);

            for file in group {
                if index.contains_key(&entry_key(&file.path_in_archive)) {
                    file.processed = true;
                    total += 1;
                }
            }
        }
        Ok(total)
    }
}

impl ArchiverList for ZipArchiver {
    fn list_files(&self, archive_path: &str, ctx: &OperationContext) -> Result<Vec<FileInArchive>> {
        if !Path::new(archive_path).is_file() {
            return Ok(Vec::new());
        }
        ctx.check_canceled()?;

        let mut archive = session::open_read(Path::new(archive_path))?;
        let listed = session::read_entries(&mut archive)?
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| FileInArchive {
                archive_path: archive_path.to_string(),
                path_in_archive: normalize_relative(&e.name),
                size_in_bytes: e.size,
                last_write_time: e.last_modified,
                processed: false,
            })
            .collect();
        Ok(listed)
    }
}
