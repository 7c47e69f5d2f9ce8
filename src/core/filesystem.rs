use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::core::archiver::{
    ArchiverCheck, ArchiverDelete, ArchiverExtract, ArchiverList, ArchiverMove, ArchiverPack,
};
use crate::core::batch::{self, OperationContext};
use crate::models::error::quote;
use crate::models::{
    ArchivedFile, ArchiverError, FileInArchive, FileToArchive, FileToCheck, FileToDelete,
    FileToExtract, FileToMove, Result,
};
use crate::utils::path::{normalize_relative, same_local_path};

/// Archiver where a plain directory plays the role of the archive
///
/// Files are copied, moved and deleted byte for byte on the local filesystem.
pub struct FileSystemArchiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Pack,
    Extract,
    Move,
    Delete,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::Pack => "pack",
            Action::Extract => "extract",
            Action::Move => "move",
            Action::Delete => "delete",
        }
    }
}

impl FileSystemArchiver {
    pub fn new() -> Self {
        Self
    }

    /// Run `action` on every file
    ///
    /// `resolve` gives the source and the optional target of each file.
    fn run<T, F>(&self, files: &mut [T], ctx: &OperationContext, action: Action, resolve: F) -> Result<usize>
    where
        T: ArchivedFile,
        F: Fn(&T) -> (PathBuf, Option<PathBuf>),
    {
        batch::reset_processed(files);
        let emitter = ctx.emitter(files.len());
        let mut files_done = 0usize;

        for file in files.iter_mut() {
            ctx.check_canceled()?;
            let (source, target) = resolve(file);

            if !source.is_file() {
                log::debug!("Skipping missing file {}", source.display());
                continue;
            }

            if let Some(parent) = target.as_deref().and_then(Path::parent) {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| {
                        ArchiverError::wrap(format!("Failed to create directory {}", quote(parent.to_string_lossy())), e)
                    })?;
                }
            }

            let outcome = match (action, target.as_deref()) {
                (Action::Pack, Some(target)) | (Action::Extract, Some(target)) => {
                    if same_local_path(&source, target) {
                        Ok(())
                    } else {
                        let archive_path = file.archive_path().to_string();
                        let relative_path = file.path_in_archive().to_string();
                        copy_file(&source, target, ctx, |done, total| {
                            if done != total {
                                emitter.emit_bytes(&archive_path, &relative_path, files_done, done, Some(total));
                            }
                        })
                    }
                }
                (Action::Move, Some(target)) => move_file(&source, target),
                (Action::Delete, _) => fs::remove_file(&source).map_err(|e| ArchiverError::wrap("Failed to remove file", e)),
                (_, None) => Err(ArchiverError::new("Target should not be empty")),
            };

            if let Err(e) = outcome {
                if e.is_canceled() {
                    return Err(e);
                }
                let target_text = target
                    .as_deref()
                    .map(|t| format!(" in {}", quote(t.to_string_lossy())))
                    .unwrap_or_default();
                return Err(ArchiverError::wrap(
                    format!("Failed to {} {}{}", action.verb(), quote(source.to_string_lossy()), target_text),
                    e,
                ));
            }

            files_done += 1;
            file.set_processed(true);
            emitter.emit_files_done(file.archive_path(), file.path_in_archive(), files_done);
        }

        log::info!("{} {} of {} file(s) in filesystem archives", action.verb(), files_done, files.len());
        Ok(files_done)
    }
}

impl Default for FileSystemArchiver {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of a file inside a directory archive
fn path_in_directory(archive_path: &str, path_in_archive: &str) -> PathBuf {
    Path::new(archive_path).join(normalize_relative(path_in_archive))
}

/// Copy `source` over `target` by chunks
///
/// A canceled copy removes the partially written target.
fn copy_file<F>(source: &Path, target: &Path, ctx: &OperationContext, mut on_progress: F) -> Result<()>
where
    F: FnMut(u64, u64),
{
    if target.exists() {
        fs::remove_file(target).map_err(|e| ArchiverError::wrap("Failed to replace existing file", e))?;
    }
    let mut reader = File::open(source).map_err(|e| ArchiverError::wrap("Failed to open source file", e))?;
    let total = reader
        .metadata()
        .map_err(|e| ArchiverError::wrap("Failed to read source metadata", e))?
        .len();
    let mut writer = File::create(target).map_err(|e| ArchiverError::wrap("Failed to create target file", e))?;

    let result = batch::copy_with_progress(&mut reader, &mut writer, ctx, |done| on_progress(done, total));
    if let Err(e) = result {
        drop(writer);
        if e.is_canceled() {
            // unfinished copy
            let _ = fs::remove_file(target);
        }
        return Err(e);
    }
    Ok(())
}

fn move_file(source: &Path, target: &Path) -> Result<()> {
    if same_local_path(source, target) {
        return Ok(());
    }
    if target.exists() {
        fs::remove_file(target).map_err(|e| ArchiverError::wrap("Failed to replace existing file", e))?;
    }
    fs::rename(source, target).map_err(|e| ArchiverError::wrap("Failed to rename file", e))
}

impl ArchiverPack for FileSystemArchiver {
    fn archive_file_set(&self, files: &mut [FileToArchive], ctx: &OperationContext) -> Result<usize> {
        self.run(files, ctx, Action::Pack, |f| {
            (f.source_path.clone(), Some(path_in_directory(&f.archive_path, &f.path_in_archive)))
        })
    }
}

impl ArchiverExtract for FileSystemArchiver {
    fn extract_file_set(&self, files: &mut [FileToExtract], ctx: &OperationContext) -> Result<usize> {
        self.run(files, ctx, Action::Extract, |f| {
            (path_in_directory(&f.archive_path, &f.path_in_archive), Some(f.extraction_path.clone()))
        })
    }
}

impl ArchiverMove for FileSystemArchiver {
    fn move_file_set(&self, files: &mut [FileToMove], ctx: &OperationContext) -> Result<usize> {
        self.run(files, ctx, Action::Move, |f| {
            (
                path_in_directory(&f.archive_path, &f.path_in_archive),
                Some(path_in_directory(&f.archive_path, &f.new_path_in_archive)),
            )
        })
    }
}

impl ArchiverDelete for FileSystemArchiver {
    fn delete_file_set(&self, files: &mut [FileToDelete], ctx: &OperationContext) -> Result<usize> {
        self.run(files, ctx, Action::Delete, |f| {
            (path_in_directory(&f.archive_path, &f.path_in_archive), None)
        })
    }
}

impl ArchiverCheck for FileSystemArchiver {
    fn check_file_set(&self, files: &mut [FileToCheck], ctx: &OperationContext) -> Result<usize> {
        batch::reset_processed(files);
        let mut total = 0usize;
        for file in files.iter_mut() {
            ctx.check_canceled()?;
            if path_in_directory(&file.archive_path, &file.path_in_archive).is_file() {
                file.processed = true;
                total += 1;
            }
        }
        Ok(total)
    }
}

impl ArchiverList for FileSystemArchiver {
    fn list_files(&self, archive_path: &str, ctx: &OperationContext) -> Result<Vec<FileInArchive>> {
        let root = Path::new(archive_path);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut listed = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            ctx.check_canceled()?;
            let entry = entry.map_err(|e| {
                ArchiverError::wrap(format!("Failed to list files of {}", quote(archive_path)), e)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).map_err(|e| {
                ArchiverError::wrap(format!("Failed to calculate relative path of {}", entry.path().display()), e)
            })?;
            let metadata = entry.metadata().map_err(|e| {
                ArchiverError::wrap(format!("Failed to get metadata of {}", entry.path().display()), e)
            })?;

            listed.push(FileInArchive {
                archive_path: archive_path.to_string(),
                path_in_archive: normalize_relative(&relative.to_string_lossy()),
                size_in_bytes: metadata.len(),
                last_write_time: metadata.modified().ok().map(DateTime::<Local>::from),
                processed: false,
            });
        }
        Ok(listed)
    }
}
