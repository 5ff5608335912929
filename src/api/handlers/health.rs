use crate::AppState;
use crate::services::scheduler::JobStatus;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub staging: String,
    pub projects: String,
    pub jobs_queued: usize,
    pub jobs_ready: usize,
    pub jobs_failed: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let staging = dir_status(&state.config.staging_dir).await;
    let projects = dir_status(&state.config.projects_dir).await;

    Json(HealthResponse {
        status: "ok".to_string(),
        staging: staging.to_string(),
        projects: projects.to_string(),
        jobs_queued: state
            .scheduler
            .count_by_status(|s| matches!(s, JobStatus::Queued)),
        jobs_ready: state
            .scheduler
            .count_by_status(|s| matches!(s, JobStatus::Ready)),
        jobs_failed: state
            .scheduler
            .count_by_status(|s| matches!(s, JobStatus::Failed { .. })),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn dir_status(dir: &std::path::Path) -> &'static str {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => "available",
        _ => "missing",
    }
}
