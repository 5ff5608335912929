use crate::services::error::IntakeError;
use crate::utils::fs::move_path;
use crate::utils::retry::{RetryPolicy, retry};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Moves a path on disk. Implementations may fail transiently.
#[async_trait]
pub trait PathMover: Send + Sync {
    async fn move_path(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Mover backed by the local filesystem
pub struct FsMover;

#[async_trait]
impl PathMover for FsMover {
    async fn move_path(&self, from: &Path, to: &Path) -> io::Result<()> {
        move_path(from, to).await
    }
}

/// Moves staged directory trees into place, retrying while another process
/// (typically an antivirus scanner) holds files inside the tree.
#[derive(Clone)]
pub struct DirectoryMigrator {
    mover: Arc<dyn PathMover>,
    policy: RetryPolicy,
}

impl DirectoryMigrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_mover(Arc::new(FsMover), policy)
    }

    pub fn with_mover(mover: Arc<dyn PathMover>, policy: RetryPolicy) -> Self {
        Self { mover, policy }
    }

    pub async fn move_dir(&self, from: &Path, to: &Path) -> Result<(), IntakeError> {
        let attempts = AtomicU32::new(0);

        let result = retry(
            self.policy,
            |_: &io::Error| true,
            |attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                if attempt > 1 {
                    tracing::warn!(
                        "Cannot move {}, probably caused by antivirus software (please disable it or add an exception), retrying ({})...",
                        from.display(),
                        attempt - 1
                    );
                } else {
                    tracing::info!("Moving {} to {}", from.display(), to.display());
                }
                self.mover.move_path(from, to)
            },
        )
        .await;

        result.map_err(|source| {
            let attempts = attempts.load(Ordering::Relaxed);
            tracing::error!(
                "Unable to move {} after {} attempts. Error: {}",
                from.display(),
                attempts,
                source
            );
            IntakeError::Migration {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                attempts,
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Fails with "resource busy" until `succeed_on` attempts were made
    struct FlakyMover {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl FlakyMover {
        fn new(succeed_on: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
            })
        }
    }

    #[async_trait]
    impl PathMover for FlakyMover {
        async fn move_path(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::ResourceBusy, "busy"))
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::fixed(20, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_succeeds_on_twentieth_attempt() {
        let mover = FlakyMover::new(20);
        let migrator = DirectoryMigrator::with_mover(mover.clone(), policy());

        migrator
            .move_dir(Path::new("/staging/x"), Path::new("/data/x/images"))
            .await
            .unwrap();

        assert_eq!(mover.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_fails_after_twenty_attempts() {
        let mover = FlakyMover::new(u32::MAX);
        let migrator = DirectoryMigrator::with_mover(mover.clone(), policy());

        let err = migrator
            .move_dir(Path::new("/staging/x"), Path::new("/data/x/images"))
            .await
            .unwrap_err();

        assert!(matches!(err, IntakeError::Migration { attempts: 20, .. }));
        assert_eq!(mover.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_moves_real_directory() {
        let root = tempfile::tempdir().unwrap();
        let from = root.path().join("staging");
        tokio::fs::create_dir(&from).await.unwrap();
        tokio::fs::write(from.join("a.jpg"), b"a").await.unwrap();
        let to = root.path().join("images");

        DirectoryMigrator::new(policy()).move_dir(&from, &to).await.unwrap();

        assert!(to.join("a.jpg").exists());
        assert!(!from.exists());
    }
}
