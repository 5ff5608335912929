use crate::services::error::IntakeError;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static IMAGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpe?g|png|gif|bmp|tiff?)$").expect("image pattern is valid"));

pub fn is_image_name(name: &str) -> bool {
    IMAGE_PATTERN.is_match(name)
}

/// Fails when `dir` holds more than `limit` entries. No limit always passes.
pub async fn check_max_images(dir: &Path, limit: Option<usize>) -> Result<(), IntakeError> {
    let Some(limit) = limit else {
        return Ok(());
    };

    let count = count_entries(dir).await?;
    if count > limit {
        return Err(IntakeError::TooManyImages { count, limit });
    }
    Ok(())
}

/// A request must bring data in at least one way.
pub fn check_minimum_input(
    has_files: bool,
    has_import_ref: bool,
    has_archive_url: bool,
) -> Result<(), IntakeError> {
    if has_files || has_import_ref || has_archive_url {
        Ok(())
    } else {
        Err(IntakeError::NoInput)
    }
}

/// Counts image-like names in `dir`. Informational only: an unreadable
/// directory counts as zero.
pub async fn estimate_images(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot estimate images in {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if is_image_name(&entry.file_name().to_string_lossy()) {
            count += 1;
        }
    }
    count
}

async fn count_entries(dir: &Path) -> Result<usize, IntakeError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| IntakeError::io(dir, e))?;

    let mut count = 0;
    while entries
        .next_entry()
        .await
        .map_err(|e| IntakeError::io(dir, e))?
        .is_some()
    {
        count += 1;
    }
    Ok(count)
}
