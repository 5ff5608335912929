//! Request lifecycle: init, upload, commit, then staging hand-off.
//!
//! A request lives in `<staging_dir>/<token>/` until it is committed. The
//! presence of `body.json` in that directory is what makes the token valid
//! for uploads and commit.

pub mod stage;

use crate::config::{ImportFallbackPolicy, IntakeConfig};
use crate::models::{JobRecord, RequestMetadata, RequestToken};
use crate::services::constraints::{check_minimum_input, estimate_images};
use crate::services::error::IntakeError;
use crate::services::migrator::DirectoryMigrator;
use crate::services::options::OptionsFilter;
use crate::services::sandbox::{ImportGrant, ImportSandbox};
use crate::services::scheduler::JobScheduler;
use crate::utils::filename::{sanitize_filename, unique_filename};
use crate::utils::fs::{list_names, remove_file_if_exists, spawn_remove_dir};
use crate::utils::retry::RetryPolicy;
use stage::{DatasetSource, StagingContext, run_staging};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::task::JoinHandle;
use validator::Validate;

/// Metadata persisted at init; its presence marks an open request
pub const METADATA_FILE: &str = "body.json";
/// Name given to an upload that would collide with [`METADATA_FILE`]
pub const RESERVED_RENAME: &str = "_body.json";
/// Archive with intermediate results, unpacked at the project root
pub const SEED_ARCHIVE: &str = "seed.zip";
/// Archive fetched from `zipurl`, unpacked into `images/`
pub const URL_ARCHIVE: &str = "zipurl.zip";

/// A request whose metadata was read back at commit
#[derive(Debug, Clone)]
pub struct CommittedRequest {
    pub token: RequestToken,
    pub metadata: RequestMetadata,
    /// Names of the files present in the staging area
    pub files: Vec<String>,
}

/// A request accepted by the scheduler. Staging continues in the background;
/// the handle resolves once the project directory is ready or staging failed.
#[derive(Debug)]
pub struct Accepted {
    pub token: RequestToken,
    pub staging: JoinHandle<Result<(), IntakeError>>,
}

pub struct IntakeService {
    config: Arc<IntakeConfig>,
    sandbox: ImportSandbox,
    scheduler: Arc<dyn JobScheduler>,
    options: Arc<dyn OptionsFilter>,
    migrator: DirectoryMigrator,
    http: reqwest::Client,
}

impl IntakeService {
    pub fn new(
        config: Arc<IntakeConfig>,
        scheduler: Arc<dyn JobScheduler>,
        options: Arc<dyn OptionsFilter>,
    ) -> Self {
        let migrator = DirectoryMigrator::new(RetryPolicy::fixed(
            config.move_retry_attempts,
            config.move_retry_delay(),
        ));
        Self {
            sandbox: ImportSandbox::new(&config.import_path_roots),
            config,
            scheduler,
            options,
            migrator,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_migrator(mut self, migrator: DirectoryMigrator) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn staging_path(&self, token: &RequestToken) -> PathBuf {
        self.config.staging_dir.join(token)
    }

    pub fn project_path(&self, token: &RequestToken) -> PathBuf {
        self.config.projects_dir.join(token)
    }

    /// Picks the token for a new request: a fresh UUID, or the caller's
    /// `set-uuid` when it is well formed and not already known.
    pub fn assign_token(&self, requested: Option<&str>) -> Result<RequestToken, IntakeError> {
        let Some(raw) = requested else {
            return Ok(RequestToken::generate());
        };

        let token =
            RequestToken::parse(raw).ok_or_else(|| IntakeError::InvalidToken(raw.to_string()))?;
        if self.scheduler.find_existing(&token) {
            return Err(IntakeError::InvalidToken(format!("{raw} already exists")));
        }
        Ok(token)
    }

    /// Validates the metadata, creates the staging area and persists the
    /// metadata into it. Nothing is left behind on failure.
    pub async fn init(
        &self,
        token: &RequestToken,
        metadata: &RequestMetadata,
    ) -> Result<(), IntakeError> {
        let result = self.try_init(token, metadata).await;
        if result.is_err() {
            self.discard(token);
        }
        result
    }

    async fn try_init(
        &self,
        token: &RequestToken,
        metadata: &RequestMetadata,
    ) -> Result<(), IntakeError> {
        metadata
            .validate()
            .map_err(|e| IntakeError::InvalidMetadata(e.to_string()))?;
        self.options.filter(&metadata.options).await?;

        let staging = self.staging_path(token);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| IntakeError::io(&staging, e))?;

        let body = serde_json::to_vec(metadata).map_err(IntakeError::MalformedMetadata)?;
        let path = staging.join(METADATA_FILE);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| IntakeError::io(&path, e))?;

        tracing::info!("Initialized request {}", token);
        Ok(())
    }

    /// Resolves a token from a URL path segment. Only tokens with an open
    /// staging area are accepted.
    pub async fn open(&self, raw: &str) -> Result<RequestToken, IntakeError> {
        let token = RequestToken::parse(raw).ok_or(IntakeError::UnknownToken)?;
        let marker = self.staging_path(&token).join(METADATA_FILE);
        let open = tokio::fs::try_exists(&marker)
            .await
            .map_err(|e| IntakeError::io(&marker, e))?;
        if !open {
            return Err(IntakeError::UnknownToken);
        }
        Ok(token)
    }

    /// Starts a single-shot request: the staging area exists but carries no
    /// metadata, which arrives together with the files.
    pub async fn begin_direct(&self, token: &RequestToken) -> Result<(), IntakeError> {
        let staging = self.staging_path(token);
        let metadata = staging.join(METADATA_FILE);
        let pending = tokio::fs::try_exists(&metadata)
            .await
            .map_err(|e| IntakeError::io(&metadata, e))?;
        if pending {
            return Err(IntakeError::InvalidToken(format!(
                "{token} has a pending initialization"
            )));
        }
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| IntakeError::io(&staging, e))
    }

    /// Streams one uploaded file into the staging area and returns the name
    /// it was stored under.
    pub async fn store_upload<R>(
        &self,
        token: &RequestToken,
        filename: &str,
        reader: &mut R,
    ) -> Result<String, IntakeError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let staging = self.staging_path(token);
        let mut name = sanitize_filename(filename)
            .ok_or_else(|| IntakeError::InvalidMetadata(format!("Invalid file name: {filename}")))?;
        if name == METADATA_FILE {
            name = RESERVED_RENAME.to_string();
        }
        let name = unique_filename(&staging, &name)
            .await
            .map_err(|e| IntakeError::io(&staging, io::Error::other(e)))?;

        let dest = staging.join(&name);
        if let Err(e) = write_stream(&dest, reader).await {
            let _ = remove_file_if_exists(&dest).await;
            return Err(IntakeError::io(&dest, e));
        }

        tracing::debug!("Stored {} for request {}", name, token);
        Ok(name)
    }

    /// Reads back and deletes the metadata, then checks that the request
    /// carries some input.
    pub async fn commit(&self, token: &RequestToken) -> Result<CommittedRequest, IntakeError> {
        let body = self.take_metadata(token).await?;
        self.parse_committed(token, &body).await
    }

    /// Claims the stored metadata. The removal decides ownership: of several
    /// concurrent callers only the one whose delete succeeds gets the body,
    /// the others see [`IntakeError::UnknownToken`].
    async fn take_metadata(&self, token: &RequestToken) -> Result<String, IntakeError> {
        let path = self.staging_path(token).join(METADATA_FILE);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(IntakeError::UnknownToken),
            Err(e) => return Err(IntakeError::io(&path, e)),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(body),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(IntakeError::UnknownToken),
            Err(e) => Err(IntakeError::io(&path, e)),
        }
    }

    async fn parse_committed(
        &self,
        token: &RequestToken,
        body: &str,
    ) -> Result<CommittedRequest, IntakeError> {
        let metadata: RequestMetadata =
            serde_json::from_str(body).map_err(IntakeError::MalformedMetadata)?;
        self.committed(token, metadata).await
    }

    /// Commit for a single-shot request whose metadata came with the upload
    pub async fn commit_direct(
        &self,
        token: &RequestToken,
        metadata: RequestMetadata,
    ) -> Result<CommittedRequest, IntakeError> {
        metadata
            .validate()
            .map_err(|e| IntakeError::InvalidMetadata(e.to_string()))?;
        self.committed(token, metadata).await
    }

    async fn committed(
        &self,
        token: &RequestToken,
        metadata: RequestMetadata,
    ) -> Result<CommittedRequest, IntakeError> {
        let staging = self.staging_path(token);
        let files = match list_names(&staging).await {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(IntakeError::io(&staging, e)),
        };

        check_minimum_input(
            !files.is_empty(),
            metadata.import_path().is_some(),
            metadata.zipurl().is_some(),
        )?;

        Ok(CommittedRequest {
            token: token.clone(),
            metadata,
            files,
        })
    }

    /// Resolves the dataset source, submits the job and spawns staging.
    /// Returns as soon as the scheduler has accepted the job.
    pub async fn stage(&self, request: CommittedRequest) -> Result<Accepted, IntakeError> {
        let CommittedRequest {
            token,
            metadata,
            files,
        } = request;
        let has_files = !files.is_empty();
        let zipurl = metadata.zipurl().map(str::to_string);
        let staging = self.staging_path(&token);

        let import = self
            .resolve_import(&token, &metadata, has_files || zipurl.is_some())
            .await?;

        let source = match &import {
            Some(grant) => DatasetSource::Import(grant.path().to_path_buf()),
            None => {
                let exists = tokio::fs::try_exists(&staging)
                    .await
                    .map_err(|e| IntakeError::io(&staging, e))?;
                if !exists {
                    return Err(IntakeError::UnknownToken);
                }
                DatasetSource::Upload { zipurl }
            }
        };

        let options = self.options.filter(&metadata.options).await?;
        let estimate_dir = match &source {
            DatasetSource::Import(dir) => dir.clone(),
            DatasetSource::Upload { .. } => staging.clone(),
        };
        let images_count_estimate = estimate_images(&estimate_dir).await;

        let record = JobRecord {
            token: token.clone(),
            name: metadata.name,
            options,
            webhook: metadata.webhook,
            skip_post_processing: metadata.skip_post_processing,
            outputs: metadata.outputs,
            date_created: metadata.date_created,
            images_count_estimate,
        };
        self.scheduler
            .submit(record)
            .await
            .map_err(IntakeError::Scheduler)?;

        let ctx = self.staging_context(&token, source);
        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(run_staging(ctx, scheduler));

        Ok(Accepted {
            token,
            staging: handle,
        })
    }

    /// Commit followed by stage. Any failure after the metadata was claimed
    /// removes the staging area; a caller that lost the claim leaves it alone.
    pub async fn finalize(&self, token: &RequestToken) -> Result<Accepted, IntakeError> {
        let body = self.take_metadata(token).await?;
        let result = match self.parse_committed(token, &body).await {
            Ok(request) => self.stage(request).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.discard(token);
        }
        result
    }

    /// Single-shot counterpart of [`Self::finalize`]
    pub async fn finalize_direct(
        &self,
        token: &RequestToken,
        metadata: RequestMetadata,
    ) -> Result<Accepted, IntakeError> {
        let result = match self.commit_direct(token, metadata).await {
            Ok(request) => self.stage(request).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.discard(token);
        }
        result
    }

    /// Best-effort background removal of the staging area
    pub fn discard(&self, token: &RequestToken) {
        spawn_remove_dir(self.staging_path(token));
    }

    async fn resolve_import(
        &self,
        token: &RequestToken,
        metadata: &RequestMetadata,
        has_other_input: bool,
    ) -> Result<Option<ImportGrant>, IntakeError> {
        let Some(raw) = metadata.import_path() else {
            return Ok(None);
        };

        match self.sandbox.resolve(raw).await {
            Ok(grant) => {
                tracing::info!(
                    "Using import_path {} for {}",
                    grant.path().display(),
                    token
                );
                Ok(Some(grant))
            }
            Err(e)
                if has_other_input
                    && self.config.import_fallback == ImportFallbackPolicy::FallbackToUpload =>
            {
                tracing::warn!(
                    "Ignoring import_path for {} and staging uploaded data: {}",
                    token,
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn staging_context(&self, token: &RequestToken, source: DatasetSource) -> StagingContext {
        let project = self.project_path(token);
        StagingContext {
            token: token.clone(),
            staging: self.staging_path(token),
            projects_root: self.config.projects_dir.clone(),
            images: project.join("images"),
            gcp: project.join("gcp"),
            project,
            source,
            max_images: self.config.max_images,
            preserve_seed_zip: self.config.preserve_seed_zip,
            migrator: self.migrator.clone(),
            http: self.http.clone(),
        }
    }
}

async fn write_stream<R>(dest: &std::path::Path, reader: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = tokio::fs::File::create(dest).await?;
    let written = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(written)
}
