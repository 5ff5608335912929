use crate::services::error::IntakeError;
use crate::utils::fs::move_path;
use regex::Regex;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

static SUPPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.txt$|^align\.(las|laz|tif)$)").expect("support pattern is valid")
});

/// Ground control (`*.txt`) and alignment (`align.las|laz|tif`) files
pub fn is_support_file(name: &str) -> bool {
    SUPPORT_PATTERN.is_match(name)
}

fn is_zip(name: &str) -> bool {
    name.to_lowercase().ends_with(".zip")
}

/// Moves support files out of `images` into `gcp` and deletes any zip files
/// left in `images`. Runs after archive extraction so unpacked files are
/// routed too. Returns the names that were moved.
pub async fn route_support_files(images: &Path, gcp: &Path) -> Result<Vec<String>, IntakeError> {
    let mut entries = tokio::fs::read_dir(images)
        .await
        .map_err(|e| IntakeError::io(images, e))?;
    let mut moved = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IntakeError::io(images, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if is_support_file(&name) {
            move_path(&path, &gcp.join(&name))
                .await
                .map_err(|e| IntakeError::io(&path, e))?;
            tracing::debug!("Moved support file {} to {}", name, gcp.display());
            moved.push(name);
        } else if is_zip(&name) {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| IntakeError::io(&path, e))?;
            tracing::debug!("Removed leftover archive {}", path.display());
        }
    }

    Ok(moved)
}

/// Copies support files from an external dataset directory into `gcp`.
/// Files already present in `gcp` are left alone, and a missing source
/// directory copies nothing.
pub async fn copy_support_files(src: &Path, gcp: &Path) -> Result<Vec<String>, IntakeError> {
    let mut entries = match tokio::fs::read_dir(src).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IntakeError::io(src, e)),
    };
    let mut copied = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IntakeError::io(src, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_support_file(&name) {
            continue;
        }

        let dst = gcp.join(&name);
        if tokio::fs::try_exists(&dst)
            .await
            .map_err(|e| IntakeError::io(&dst, e))?
        {
            continue;
        }

        tokio::fs::copy(entry.path(), &dst)
            .await
            .map_err(|e| IntakeError::io(&dst, e))?;
        copied.push(name);
    }

    Ok(copied)
}
