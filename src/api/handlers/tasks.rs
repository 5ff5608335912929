use crate::AppState;
use crate::api::error::AppError;
use crate::models::{RequestMetadata, RequestToken};
use crate::services::error::IntakeError;
use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Header a client may use to choose the request token
pub const SET_UUID_HEADER: &str = "set-uuid";
/// Multipart field carrying dataset files
pub const FILES_FIELD: &str = "images";

#[derive(Serialize, ToSchema)]
pub struct TaskCreated {
    pub uuid: String,
}

#[derive(Serialize, ToSchema)]
pub struct UploadAccepted {
    pub success: bool,
}

/// Multipart body of the upload endpoints
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = Vec<String>, format = Binary)]
    pub images: Vec<Vec<u8>>,
}

#[utoipa::path(
    post,
    path = "/task/new/init",
    params(
        ("set-uuid" = Option<String>, Header, description = "Client-chosen UUID for the new task")
    ),
    request_body(content = RequestMetadata, description = "Task metadata as JSON, form fields or empty"),
    responses(
        (status = 200, description = "Task initialized", body = TaskCreated),
        (status = 400, description = "Invalid metadata or set-uuid")
    ),
    tag = "tasks"
)]
pub async fn init_task(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<TaskCreated>, AppError> {
    let token = state.intake.assign_token(requested_token(req.headers()))?;
    let metadata = read_init_body(req).await?;

    state.intake.init(&token, &metadata).await?;

    Ok(Json(TaskCreated {
        uuid: token.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/task/new/upload/{uuid}",
    params(
        ("uuid" = String, Path, description = "Token returned by /task/new/init")
    ),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Files stored", body = UploadAccepted),
        (status = 400, description = "Unknown task or no files")
    ),
    tag = "tasks"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadAccepted>, AppError> {
    let token = state.intake.open(&uuid).await?;

    let mut stored = 0;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let reader = StreamReader::new(field.map_err(io::Error::other));
        tokio::pin!(reader);
        state.intake.store_upload(&token, &filename, &mut reader).await?;
        stored += 1;
    }

    if stored == 0 {
        return Err(IntakeError::NoFiles.into());
    }
    tracing::info!("Stored {} file(s) for {}", stored, token);

    Ok(Json(UploadAccepted { success: true }))
}

#[utoipa::path(
    post,
    path = "/task/new/commit/{uuid}",
    params(
        ("uuid" = String, Path, description = "Token returned by /task/new/init")
    ),
    responses(
        (status = 200, description = "Task accepted for processing", body = TaskCreated),
        (status = 400, description = "Unknown task, missing input or rejected import_path")
    ),
    tag = "tasks"
)]
pub async fn commit_task(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<TaskCreated>, AppError> {
    let token = state.intake.open(&uuid).await?;
    let accepted = state.intake.finalize(&token).await?;

    Ok(Json(TaskCreated {
        uuid: accepted.token.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/task/new",
    params(
        ("set-uuid" = Option<String>, Header, description = "Client-chosen UUID for the new task")
    ),
    request_body(content = UploadForm, content_type = "multipart/form-data",
        description = "Metadata fields and files in a single request"),
    responses(
        (status = 200, description = "Task accepted for processing", body = TaskCreated),
        (status = 400, description = "Invalid metadata or missing input")
    ),
    tag = "tasks"
)]
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<TaskCreated>, AppError> {
    let token = state.intake.assign_token(requested_token(&headers))?;
    state.intake.begin_direct(&token).await?;

    let metadata = match receive_direct(&state, &token, multipart).await {
        Ok(metadata) => metadata,
        Err(e) => {
            state.intake.discard(&token);
            return Err(e);
        }
    };
    let accepted = state.intake.finalize_direct(&token, metadata).await?;

    Ok(Json(TaskCreated {
        uuid: accepted.token.to_string(),
    }))
}

async fn receive_direct(
    state: &AppState,
    token: &RequestToken,
    mut multipart: Multipart,
) -> Result<RequestMetadata, AppError> {
    let mut fields = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == FILES_FIELD {
            let filename = field.file_name().unwrap_or_default().to_string();
            let reader = StreamReader::new(field.map_err(io::Error::other));
            tokio::pin!(reader);
            state.intake.store_upload(token, &filename, &mut reader).await?;
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    RequestMetadata::from_fields(fields)
        .map_err(|e| AppError::Intake(IntakeError::MalformedMetadata(e)))
}

fn requested_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SET_UUID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Init accepts JSON, urlencoded or multipart text fields, or no body at all.
async fn read_init_body(req: Request) -> Result<RequestMetadata, AppError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if let Some(name) = field.name().map(str::to_string) {
                fields.insert(name, field.text().await.map_err(multipart_error)?);
            }
        }
        return RequestMetadata::from_fields(fields)
            .map_err(|e| IntakeError::MalformedMetadata(e).into());
    }

    let body = Bytes::from_request(req, &())
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;
    parse_init_body(&content_type, &body)
}

fn parse_init_body(content_type: &str, body: &[u8]) -> Result<RequestMetadata, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RequestMetadata::default());
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields: HashMap<String, String> = serde_urlencoded::from_bytes(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid form body: {e}")))?;
        return RequestMetadata::from_fields(fields)
            .map_err(|e| IntakeError::MalformedMetadata(e).into());
    }

    serde_json::from_slice(body).map_err(|e| IntakeError::MalformedMetadata(e).into())
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}
