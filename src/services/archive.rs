use crate::utils::fs::{list_names, remove_file_if_exists};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

/// Number of top-level names reported after an extraction
pub const SUMMARY_PREVIEW_LEN: usize = 15;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read archive: {0}")]
    Zip(#[from] ZipError),

    #[error("entry {0} escapes the extraction directory")]
    UnsafeEntry(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("extraction task failed: {0}")]
    Task(String),
}

impl ArchiveError {
    /// True when the archive itself is bad, as opposed to the local disk.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Zip(_) | Self::UnsafeEntry(_))
    }
}

/// How entry paths map onto the extraction directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLayout {
    /// Keep each entry's relative path
    Preserve,
    /// Drop directories and write every file directly into the target.
    /// Later entries win on name clashes.
    Flatten,
}

/// Shape of a directory after an archive was unpacked into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Entries read from the archive, directories included
    pub entries: usize,
    /// Number of top-level names in the target directory
    pub top_level_count: usize,
    /// The first [`SUMMARY_PREVIEW_LEN`] top-level names
    pub preview: Vec<String>,
}

/// Extracts `archive` into `target` using the given entry layout.
///
/// When `debug_copy` is set the archive is first copied there unmodified; a
/// failed copy is logged and does not stop the extraction. Errors are not
/// retried. Once extraction succeeds the archive is removed if it is still
/// present.
pub async fn extract(
    archive: &Path,
    target: &Path,
    debug_copy: Option<&Path>,
    layout: EntryLayout,
) -> Result<ExtractionSummary, ArchiveError> {
    if let Some(copy_path) = debug_copy {
        match tokio::fs::copy(archive, copy_path).await {
            Ok(_) => tracing::info!("Preserved archive at {}", copy_path.display()),
            Err(e) => tracing::warn!(
                "Failed to copy {} to {}: {}",
                archive.display(),
                copy_path.display(),
                e
            ),
        }
    }

    tracing::info!("Unzipping {} into {}", archive.display(), target.display());

    let entries = {
        let archive = archive.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || unpack(&archive, &target, layout))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    };

    let entries = match entries {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Unzip of {} failed: {}", archive.display(), e);
            return Err(e);
        }
    };

    let summary = summarize(target, entries).await;
    log_summary(archive, &summary);

    if remove_file_if_exists(archive).await? {
        tracing::debug!("Removed archive {}", archive.display());
    }

    Ok(summary)
}

fn unpack(archive_path: &Path, target: &Path, layout: EntryLayout) -> Result<usize, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative: PathBuf = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => return Err(ArchiveError::UnsafeEntry(entry.name().to_string())),
        };

        let out_path = match layout {
            EntryLayout::Preserve => target.join(relative),
            EntryLayout::Flatten => match relative.file_name() {
                Some(name) if !entry.is_dir() => target.join(name),
                _ => continue,
            },
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&out_path)?;
        io::copy(&mut entry, &mut outfile)?;
    }

    Ok(archive.len())
}

async fn summarize(target: &Path, entries: usize) -> ExtractionSummary {
    let names = match list_names(target).await {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!("Unable to list {} after extraction: {}", target.display(), e);
            Vec::new()
        }
    };

    ExtractionSummary {
        entries,
        top_level_count: names.len(),
        preview: names.into_iter().take(SUMMARY_PREVIEW_LEN).collect(),
    }
}

fn log_summary(archive: &Path, summary: &ExtractionSummary) {
    if summary.entries == 0 {
        tracing::warn!(
            "Extraction of {} produced no entries; check the archive contents",
            archive.display()
        );
        return;
    }

    tracing::info!(
        "Extraction of {} produced {} entries, {} top-level: {}",
        archive.display(),
        summary.entries,
        summary.top_level_count,
        summary.preview.join(", ")
    );
}
