use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Moves a file or directory tree. Falls back to copy + remove when source
/// and destination live on different filesystems.
pub async fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                "Rename {} -> {} crosses devices, copying instead",
                from.display(),
                to.display()
            );
            let meta = fs::symlink_metadata(from).await?;
            if meta.is_dir() {
                copy_dir_recursive(from.to_path_buf(), to.to_path_buf()).await?;
                fs::remove_dir_all(from).await
            } else {
                fs::copy(from, to).await?;
                fs::remove_file(from).await
            }
        }
        Err(e) => Err(e),
    }
}

#[async_recursion::async_recursion]
pub async fn copy_dir_recursive(from: PathBuf, to: PathBuf) -> io::Result<()> {
    fs::create_dir_all(&to).await?;
    let mut entries = fs::read_dir(&from).await?;

    while let Some(entry) = entries.next_entry().await? {
        let target = to.join(entry.file_name());
        if entry.file_type().await?.is_dir() {
            copy_dir_recursive(entry.path(), target).await?;
        } else {
            fs::copy(entry.path(), &target).await?;
        }
    }

    Ok(())
}

/// Creates a single directory. Returns false when it already existed.
pub async fn create_dir_idempotent(path: &Path) -> io::Result<bool> {
    match fs::create_dir(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Removes a directory tree; a missing directory is not an error.
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Removes a file; a missing file is not an error. Returns whether a file
/// was removed.
pub async fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Fire-and-forget removal of a directory tree. Errors are logged and
/// otherwise ignored.
pub fn spawn_remove_dir(path: PathBuf) {
    tokio::spawn(async move {
        if let Err(e) = remove_dir_if_exists(&path).await {
            tracing::debug!("Cleanup of {} failed: {}", path.display(), e);
        }
    });
}

/// Creates `link` as a symbolic link to the directory `target`.
#[cfg(unix)]
pub async fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
pub async fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink_dir(target, link).await
}

/// Names of the immediate entries of `dir`, in directory order.
pub async fn list_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
