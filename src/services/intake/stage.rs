//! Stages that turn a committed request into a project directory.
//!
//! Each stage reads the immutable [`StagingContext`] and either completes or
//! fails; [`Pipeline`] runs them in order and stops at the first failure.

use super::{SEED_ARCHIVE, URL_ARCHIVE};
use crate::models::RequestToken;
use crate::services::archive::{self, ArchiveError, EntryLayout};
use crate::services::constraints::check_max_images;
use crate::services::download::download_archive;
use crate::services::error::IntakeError;
use crate::services::migrator::DirectoryMigrator;
use crate::services::pipeline::{Pipeline, StageFuture};
use crate::services::scheduler::JobScheduler;
use crate::services::support_files::{copy_support_files, route_support_files};
use crate::utils::fs::{
    create_dir_idempotent, link_dir, move_path, remove_dir_if_exists, spawn_remove_dir,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the dataset comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A sandboxed server-local directory, linked as `images/`
    Import(PathBuf),
    /// Files in the staging area, plus an optional archive to download
    Upload { zipurl: Option<String> },
}

/// Everything the stages need, fixed before the first stage runs
#[derive(Clone)]
pub struct StagingContext {
    pub token: RequestToken,
    pub staging: PathBuf,
    pub projects_root: PathBuf,
    pub project: PathBuf,
    pub images: PathBuf,
    pub gcp: PathBuf,
    pub source: DatasetSource,
    pub max_images: Option<usize>,
    pub preserve_seed_zip: bool,
    pub migrator: DirectoryMigrator,
    pub http: reqwest::Client,
}

impl StagingContext {
    pub fn pipeline(&self) -> Pipeline<StagingContext> {
        match self.source {
            DatasetSource::Import(_) => import_pipeline(),
            DatasetSource::Upload { .. } => upload_pipeline(),
        }
    }

    fn import_dir(&self) -> Option<&Path> {
        match &self.source {
            DatasetSource::Import(dir) => Some(dir),
            DatasetSource::Upload { .. } => None,
        }
    }
}

pub fn import_pipeline() -> Pipeline<StagingContext> {
    Pipeline::new()
        .stage("reset project directory", reset_project_dir)
        .stage("create project directories", create_project_dirs)
        .stage("link import directory", link_import_dir)
        .stage("check image limit", check_image_limit)
        .stage("copy support files", copy_import_support_files)
        .stage("discard staging area", discard_staging)
}

pub fn upload_pipeline() -> Pipeline<StagingContext> {
    Pipeline::new()
        .stage("reset project directory", reset_project_dir)
        .stage("download archive", download_zipurl)
        .stage("create project directories", create_project_dirs)
        .stage("migrate uploads", migrate_uploads)
        .stage("unpack bundles", unpack_bundles)
        .stage("check image limit", check_image_limit)
        .stage("route support files", route_uploaded_support_files)
}

/// Runs the pipeline and reports the outcome to the scheduler. On failure
/// the staging area is removed but the project directory is kept for
/// postmortem inspection.
pub async fn run_staging(
    ctx: StagingContext,
    scheduler: Arc<dyn JobScheduler>,
) -> Result<(), IntakeError> {
    match ctx.pipeline().run(&ctx).await {
        Ok(()) => {
            tracing::info!("Project {} staged at {}", ctx.token, ctx.project.display());
            if let Err(e) = scheduler.mark_ready(&ctx.token).await {
                tracing::error!("Scheduler did not accept ready job {}: {}", ctx.token, e);
            }
            Ok(())
        }
        Err(failure) => {
            tracing::error!(
                "Task initialization failed for {} ({}): {}",
                ctx.token,
                failure.stage,
                failure.error
            );
            spawn_remove_dir(ctx.staging.clone());
            tracing::warn!(
                "Task initialization failed for {}; preserving {} for debugging.",
                ctx.token,
                ctx.project.display()
            );
            if let Err(e) = scheduler
                .mark_failed(&ctx.token, &failure.error.to_string())
                .await
            {
                tracing::error!("Cannot report failure of {}: {}", ctx.token, e);
            }
            Err(failure.error)
        }
    }
}

fn reset_project_dir(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        // Left over from an earlier attempt that reused the same set-uuid
        remove_dir_if_exists(&ctx.project)
            .await
            .map_err(IntakeError::ProjectDirBusy)
    })
}

fn download_zipurl(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        let DatasetSource::Upload {
            zipurl: Some(url),
        } = &ctx.source
        else {
            return Ok(());
        };

        tokio::fs::create_dir_all(&ctx.staging)
            .await
            .map_err(|e| IntakeError::io(&ctx.staging, e))?;
        download_archive(&ctx.http, url, &ctx.staging.join(URL_ARCHIVE)).await?;
        Ok(())
    })
}

fn create_project_dirs(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&ctx.projects_root)
            .await
            .map_err(|e| IntakeError::io(&ctx.projects_root, e))?;

        for dir in [&ctx.project, &ctx.gcp] {
            let created = create_dir_idempotent(dir)
                .await
                .map_err(|e| IntakeError::io(dir, e))?;
            if created {
                tracing::info!("Created directory {}", dir.display());
            } else {
                tracing::info!("Directory {} already exists", dir.display());
            }
        }
        Ok(())
    })
}

fn link_import_dir(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        let Some(import) = ctx.import_dir() else {
            return Ok(());
        };

        match link_dir(import, &ctx.images).await {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tokio::fs::remove_file(&ctx.images)
                    .await
                    .map_err(|e| IntakeError::io(&ctx.images, e))?;
                link_dir(import, &ctx.images)
                    .await
                    .map_err(|e| IntakeError::io(&ctx.images, e))
            }
            other => other.map_err(|e| IntakeError::io(&ctx.images, e)),
        }
    })
}

fn check_image_limit(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move { check_max_images(&ctx.images, ctx.max_images).await })
}

fn copy_import_support_files(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        let Some(import) = ctx.import_dir() else {
            return Ok(());
        };
        let copied = copy_support_files(import, &ctx.gcp).await?;
        if !copied.is_empty() {
            tracing::info!("Copied support files for {}: {}", ctx.token, copied.join(", "));
        }
        Ok(())
    })
}

fn discard_staging(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        remove_dir_if_exists(&ctx.staging)
            .await
            .map_err(|e| IntakeError::io(&ctx.staging, e))
    })
}

fn migrate_uploads(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move { ctx.migrator.move_dir(&ctx.staging, &ctx.images).await })
}

fn unpack_bundles(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        let seed = ctx.images.join(SEED_ARCHIVE);
        if exists(&seed).await? {
            tracing::info!("Found {} in {}", SEED_ARCHIVE, ctx.images.display());
            unpack_seed(ctx, &seed).await?;
        }

        let bundle = ctx.images.join(URL_ARCHIVE);
        if exists(&bundle).await? {
            tracing::info!("Found {} in {}", URL_ARCHIVE, ctx.images.display());
            archive::extract(&bundle, &ctx.images, None, EntryLayout::Flatten)
                .await
                .map_err(|source| archive_error(&bundle, source))?;
        }
        Ok(())
    })
}

/// Seed archives carry intermediate results laid out relative to the project
/// root, so they are moved there before extraction.
async fn unpack_seed(ctx: &StagingContext, seed: &Path) -> Result<(), IntakeError> {
    let relocated = ctx.project.join(SEED_ARCHIVE);
    tracing::info!(
        "Moving seed archive from {} to {}",
        seed.display(),
        relocated.display()
    );
    move_path(seed, &relocated)
        .await
        .map_err(|e| IntakeError::io(seed, e))?;

    let debug_copy = ctx
        .preserve_seed_zip
        .then(|| ctx.project.join(format!("seed-{}.zip", ctx.token)));

    archive::extract(
        &relocated,
        &ctx.project,
        debug_copy.as_deref(),
        EntryLayout::Preserve,
    )
        .await
        .map_err(|source| archive_error(&relocated, source))?;
    Ok(())
}

fn route_uploaded_support_files(ctx: &StagingContext) -> StageFuture<'_> {
    Box::pin(async move {
        let moved = route_support_files(&ctx.images, &ctx.gcp).await?;
        if !moved.is_empty() {
            tracing::info!("Moved support files for {}: {}", ctx.token, moved.join(", "));
        }
        Ok(())
    })
}

async fn exists(path: &Path) -> Result<bool, IntakeError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| IntakeError::io(path, e))
}

fn archive_error(path: &Path, source: ArchiveError) -> IntakeError {
    IntakeError::Archive {
        path: path.to_path_buf(),
        source,
    }
}
