use crate::services::archive::ArchiveError;
use crate::services::options::OptionsError;
use crate::services::sandbox::SandboxError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Invalid set-uuid: {0}")]
    InvalidToken(String),

    #[error("Invalid uuid (not found)")]
    UnknownToken,

    #[error("Need at least 1 file.")]
    NoFiles,

    #[error("Need at least 1 file, an import_path or a zipurl.")]
    NoInput,

    #[error("Malformed body.json: {0}")]
    MalformedMetadata(#[source] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidMetadata(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("{count} images uploaded, but this node can only process up to {limit}.")]
    TooManyImages { count: usize, limit: usize },

    #[error("Directory exists and we couldn't remove it.")]
    ProjectDirBusy(#[source] io::Error),

    #[error("Unable to move {} to {} after {attempts} attempts: {source}", .from.display(), .to.display())]
    Migration {
        from: PathBuf,
        to: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Cannot extract {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("Cannot download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Job scheduler error: {0}")]
    Scheduler(#[source] anyhow::Error),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IntakeError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Errors caused by the request itself. Retrying the same request cannot
    /// succeed.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidToken(_)
            | Self::UnknownToken
            | Self::NoFiles
            | Self::NoInput
            | Self::MalformedMetadata(_)
            | Self::InvalidMetadata(_)
            | Self::Sandbox(_)
            | Self::Options(_)
            | Self::TooManyImages { .. } => true,
            Self::Archive { source, .. } => source.is_corrupt(),
            _ => false,
        }
    }
}
