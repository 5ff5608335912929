use crate::utils::fs::remove_dir_if_exists;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Removes staging areas abandoned by clients that never committed.
pub struct StagingSweeper {
    staging_dir: PathBuf,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingSweeper {
    pub fn new(staging_dir: PathBuf, max_age: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            staging_dir,
            max_age,
            interval: Duration::from_secs(3600),
            shutdown,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Removes every staging area older than the configured age and returns
    /// how many were removed.
    pub async fn sweep_once(&self) -> usize {
        tracing::info!("🧹 Sweeping abandoned staging areas...");

        let mut entries = match tokio::fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", self.staging_dir.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.max_age {
                continue;
            }

            let path = entry.path();
            match remove_dir_if_exists(&path).await {
                Ok(()) => {
                    tracing::info!("Removed stale staging area {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::error!("Failed to remove {}: {}", path.display(), e),
            }
        }

        tracing::info!("✅ Staging sweep completed ({} removed)", removed);
        removed
    }
}
