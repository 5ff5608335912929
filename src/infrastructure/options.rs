use crate::config::IntakeConfig;
use crate::services::options::{CatalogFilter, OptionsFilter, PassThroughFilter};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn setup_options_filter(config: &IntakeConfig) -> anyhow::Result<Arc<dyn OptionsFilter>> {
    match &config.options_catalog {
        Some(path) => {
            let catalog = CatalogFilter::load(path).await?;
            info!(
                "⚙️  Options catalog: {} ({} options)",
                path.display(),
                catalog.len()
            );
            Ok(Arc::new(catalog))
        }
        None => {
            warn!("⚙️  No ODM_OPTIONS_FILE set, processing options are not validated");
            Ok(Arc::new(PassThroughFilter))
        }
    }
}
