use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// What to do when an `import_path` fails sandbox resolution but the request
/// also carries uploaded files or a `zipurl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFallbackPolicy {
    /// Log the rejection and stage from the uploaded data instead.
    FallbackToUpload,
    /// Abort the request with the resolution error.
    Reject,
}

impl ImportFallbackPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "fallback" | "upload" => Some(Self::FallbackToUpload),
            "reject" | "strict" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Configuration for the ingestion/staging subsystem
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Root of per-request staging areas (default: "tmp")
    pub staging_dir: PathBuf,

    /// Root of prepared project directories (default: "data")
    pub projects_dir: PathBuf,

    /// Directories that `import_path` references may point into
    pub import_path_roots: Vec<PathBuf>,

    /// Maximum number of entries in a dataset directory (None: unlimited)
    pub max_images: Option<usize>,

    /// Keep a `seed-<uuid>.zip` copy next to the project for debugging
    pub preserve_seed_zip: bool,

    pub import_fallback: ImportFallbackPolicy,

    /// Option catalog dumped from the processing engine
    pub options_catalog: Option<PathBuf>,

    /// Request body limit in bytes (default: 4 GB)
    pub max_upload_size: usize,

    /// Age after which an abandoned staging area is swept (default: 24)
    pub staging_cleanup_age_hours: u64,

    /// Attempts made when moving uploads into a project (default: 20)
    pub move_retry_attempts: u32,

    /// Fixed delay between move attempts in milliseconds (default: 2000)
    pub move_retry_delay_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("tmp"),
            projects_dir: PathBuf::from("data"),
            import_path_roots: Vec::new(),
            max_images: None,
            preserve_seed_zip: false,
            import_fallback: ImportFallbackPolicy::FallbackToUpload,
            options_catalog: None,
            max_upload_size: 4 * 1024 * 1024 * 1024,
            staging_cleanup_age_hours: 24,
            move_retry_attempts: 20,
            move_retry_delay_ms: 2000,
        }
    }
}

impl IntakeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            projects_dir: env::var("PROJECTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.projects_dir),

            import_path_roots: env::var("IMPORT_PATH_ROOTS")
                .map(|v| parse_roots(&v))
                .unwrap_or(default.import_path_roots),

            max_images: env::var("MAX_IMAGES")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|limit| *limit > 0),

            preserve_seed_zip: env::var("PRESERVE_SEED_ZIP")
                .map(|v| parse_flag(&v))
                .unwrap_or(default.preserve_seed_zip),

            import_fallback: env::var("IMPORT_FALLBACK_POLICY")
                .ok()
                .and_then(|v| ImportFallbackPolicy::parse(&v))
                .unwrap_or(default.import_fallback),

            options_catalog: env::var("ODM_OPTIONS_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            staging_cleanup_age_hours: env::var("STAGING_CLEANUP_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_cleanup_age_hours),

            move_retry_attempts: env::var("MOVE_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.move_retry_attempts),

            move_retry_delay_ms: env::var("MOVE_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.move_retry_delay_ms),
        }
    }

    /// Create config for development and tests (no retry delay)
    pub fn development() -> Self {
        Self {
            move_retry_attempts: 3,
            move_retry_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn move_retry_delay(&self) -> Duration {
        Duration::from_millis(self.move_retry_delay_ms)
    }

    pub fn staging_cleanup_age(&self) -> Duration {
        Duration::from_secs(self.staging_cleanup_age_hours * 3600)
    }
}

/// Boolean-like environment flag. Unset, empty, "0" and "false" (any case)
/// are disabled; everything else enables.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0" && value.to_lowercase() != "false"
}

fn parse_roots(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|root| !root.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IntakeConfig::default();
        assert_eq!(config.staging_dir, PathBuf::from("tmp"));
        assert_eq!(config.projects_dir, PathBuf::from("data"));
        assert!(config.import_path_roots.is_empty());
        assert_eq!(config.max_images, None);
        assert_eq!(config.move_retry_attempts, 20);
        assert_eq!(config.move_retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_development_config() {
        let config = IntakeConfig::development();
        assert_eq!(config.move_retry_delay(), Duration::ZERO);
        assert!(!config.preserve_seed_zip);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("yes"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("FaLsE"));
    }

    #[test]
    fn test_parse_roots_drops_blanks() {
        let roots = parse_roots("/mnt/a, ,/mnt/b/,");
        assert_eq!(roots, vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b/")]);
    }

    #[test]
    fn test_fallback_policy_parse() {
        assert_eq!(
            ImportFallbackPolicy::parse("Reject"),
            Some(ImportFallbackPolicy::Reject)
        );
        assert_eq!(
            ImportFallbackPolicy::parse("fallback"),
            Some(ImportFallbackPolicy::FallbackToUpload)
        );
        assert_eq!(ImportFallbackPolicy::parse("maybe"), None);
    }
}
