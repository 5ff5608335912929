pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::config::IntakeConfig;
use crate::services::intake::IntakeService;
use crate::services::scheduler::InMemoryScheduler;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::tasks::init_task,
        handlers::tasks::upload_files,
        handlers::tasks::commit_task,
        handlers::tasks::create_task,
    ),
    components(
        schemas(
            handlers::health::HealthResponse,
            handlers::tasks::TaskCreated,
            handlers::tasks::UploadAccepted,
            handlers::tasks::UploadForm,
            models::RequestMetadata,
            models::TaskOption,
            models::JobRecord,
            services::scheduler::JobStatus,
        )
    ),
    tags(
        (name = "tasks", description = "Task intake endpoints"),
        (name = "system", description = "Health and status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeService>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub config: Arc<IntakeConfig>,
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_size;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health::health_check))
        .route("/task/new/init", post(handlers::tasks::init_task))
        .route("/task/new/upload/:uuid", post(handlers::tasks::upload_files))
        .route("/task/new/commit/:uuid", post(handlers::tasks::commit_task))
        .route("/task/new", post(handlers::tasks::create_task))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
