use crate::config::IntakeConfig;
use anyhow::Context;
use tracing::info;

/// Creates the staging and project roots so the first request does not race
/// on them.
pub async fn prepare_directories(config: &IntakeConfig) -> anyhow::Result<()> {
    for dir in [&config.staging_dir, &config.projects_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }

    info!(
        "📁 Storage: staging={} projects={}",
        config.staging_dir.display(),
        config.projects_dir.display()
    );
    if config.import_path_roots.is_empty() {
        info!("📁 import_path disabled (no IMPORT_PATH_ROOTS)");
    } else {
        for root in &config.import_path_roots {
            info!("📁 import_path root: {}", root.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_directories() {
        let root = tempfile::tempdir().unwrap();
        let config = IntakeConfig {
            staging_dir: root.path().join("tmp"),
            projects_dir: root.path().join("nested/data"),
            ..IntakeConfig::default()
        };

        prepare_directories(&config).await.unwrap();
        prepare_directories(&config).await.unwrap();

        assert!(config.staging_dir.is_dir());
        assert!(config.projects_dir.is_dir());
    }
}
