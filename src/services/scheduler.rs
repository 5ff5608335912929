use crate::models::{JobRecord, RequestToken};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;

/// Downstream job scheduler. Intake only submits records and reports how
/// staging ended; execution order and concurrency belong to the scheduler.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Whether a job with this token is already known
    fn find_existing(&self, token: &RequestToken) -> bool;

    /// Registers an accepted job. Staging continues after this returns.
    async fn submit(&self, record: JobRecord) -> Result<()>;

    /// The project directory is fully staged; the job may run.
    async fn mark_ready(&self, token: &RequestToken) -> Result<()>;

    /// Staging failed after the job was submitted.
    async fn mark_failed(&self, token: &RequestToken, reason: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Ready,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub record: JobRecord,
    pub status: JobStatus,
}

/// Scheduler that only keeps jobs in memory, for the standalone binary and
/// tests
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    jobs: DashMap<RequestToken, ScheduledJob>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &RequestToken) -> Option<ScheduledJob> {
        self.jobs.get(token).map(|job| job.value().clone())
    }

    pub fn status(&self, token: &RequestToken) -> Option<JobStatus> {
        self.jobs.get(token).map(|job| job.status.clone())
    }

    pub fn count_by_status(&self, wanted: fn(&JobStatus) -> bool) -> usize {
        self.jobs.iter().filter(|job| wanted(&job.status)).count()
    }

    fn set_status(&self, token: &RequestToken, status: JobStatus) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(token)
            .ok_or_else(|| anyhow!("Unknown job {}", token))?;
        job.status = status;
        Ok(())
    }
}

#[async_trait]
impl JobScheduler for InMemoryScheduler {
    fn find_existing(&self, token: &RequestToken) -> bool {
        self.jobs.contains_key(token)
    }

    async fn submit(&self, record: JobRecord) -> Result<()> {
        let token = record.token.clone();
        if self.jobs.contains_key(&token) {
            return Err(anyhow!("Job {} already exists", token));
        }
        tracing::info!(
            "📋 Job {} queued ({} images estimated)",
            token,
            record.images_count_estimate
        );
        self.jobs.insert(
            token,
            ScheduledJob {
                record,
                status: JobStatus::Queued,
            },
        );
        Ok(())
    }

    async fn mark_ready(&self, token: &RequestToken) -> Result<()> {
        tracing::info!("✅ Job {} is ready for processing", token);
        self.set_status(token, JobStatus::Ready)
    }

    async fn mark_failed(&self, token: &RequestToken, reason: &str) -> Result<()> {
        self.set_status(
            token,
            JobStatus::Failed {
                reason: reason.to_string(),
            },
        )
    }
}
