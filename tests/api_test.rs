mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use common::{Harness, Part, multipart_body, multipart_content_type, zip_bytes};
use http_body_util::BodyExt;
use serde_json::Value;
use task_intake::models::RequestToken;
use task_intake::services::scheduler::JobStatus;
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| panic!("non-JSON body: {}", String::from_utf8_lossy(&body)))
    };
    (status, json)
}

fn post(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("POST").uri(uri)
}

#[tokio::test]
async fn test_three_phase_flow() {
    let harness = Harness::new();
    let app = harness.app();

    // 1. Init with a client-chosen token
    let (status, json) = send(
        &app,
        post("/task/new/init")
            .header("set-uuid", "3f2504e0-4f89-41d3-9a0c-0305e82c3301")
            .header("Content-Type", "application/json")
            .body(Body::from(
                r#"{"name": "survey", "options": [{"name": "dsm", "value": true}]}"#,
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    let uuid = json["uuid"].as_str().unwrap().to_string();
    assert_eq!(uuid, "3f2504e0-4f89-41d3-9a0c-0305e82c3301");

    // 2. Upload two files in one request
    let (status, json) = send(
        &app,
        post(&format!("/task/new/upload/{uuid}"))
            .header("Content-Type", multipart_content_type())
            .body(Body::from(multipart_body(&[
                Part::File("images", "a.jpg", b"jpeg-a"),
                Part::File("images", "gcp_list.txt", b"EPSG:4326"),
            ])))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);

    // 3. Commit
    let (status, json) = send(
        &app,
        post(&format!("/task/new/commit/{uuid}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["uuid"], uuid.as_str());

    let token = RequestToken::parse(&uuid).unwrap();
    assert_eq!(harness.wait_for_job(&token).await, JobStatus::Ready);

    let project = harness.project(&token);
    assert!(project.join("images/a.jpg").exists());
    assert!(project.join("gcp/gcp_list.txt").exists());

    let job = harness.scheduler.get(&token).unwrap();
    assert_eq!(job.record.name.as_deref(), Some("survey"));
    assert_eq!(job.record.options.len(), 1);

    // 4. The token is now taken
    let (status, json) = send(
        &app,
        post("/task/new/init")
            .header("set-uuid", uuid.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["noRetry"], true);
}

#[tokio::test]
async fn test_init_accepts_form_body() {
    let harness = Harness::new();
    let app = harness.app();

    let (status, json) = send(
        &app,
        post("/task/new/init")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Body::from("name=flight&skipPostProcessing=true"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");

    let token = RequestToken::parse(json["uuid"].as_str().unwrap()).unwrap();
    assert!(harness.staging(&token).join("body.json").exists());
}

#[tokio::test]
async fn test_invalid_set_uuid() {
    let harness = Harness::new();
    let app = harness.app();

    let (status, json) = send(
        &app,
        post("/task/new/init")
            .header("set-uuid", "../../etc/passwd")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("Invalid set-uuid"));
    assert_eq!(json["noRetry"], true);
}

#[tokio::test]
async fn test_upload_to_unknown_task() {
    let harness = Harness::new();
    let app = harness.app();

    let (status, json) = send(
        &app,
        post(&format!("/task/new/upload/{}", RequestToken::generate()))
            .header("Content-Type", multipart_content_type())
            .body(Body::from(multipart_body(&[Part::File(
                "images", "a.jpg", b"a",
            )])))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid uuid (not found)");
}

#[tokio::test]
async fn test_upload_without_files() {
    let harness = Harness::new();
    let app = harness.app();

    let (_, json) = send(&app, post("/task/new/init").body(Body::empty()).unwrap()).await;
    let uuid = json["uuid"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        post(&format!("/task/new/upload/{uuid}"))
            .header("Content-Type", multipart_content_type())
            .body(Body::from(multipart_body(&[Part::Text("note", "hello")])))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Need at least 1 file.");
}

#[tokio::test]
async fn test_commit_without_input() {
    let harness = Harness::new();
    let app = harness.app();

    let (_, json) = send(&app, post("/task/new/init").body(Body::empty()).unwrap()).await;
    let uuid = json["uuid"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        post(&format!("/task/new/commit/{uuid}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "Need at least 1 file, an import_path or a zipurl."
    );

    // the request is gone after a failed commit
    let (status, _) = send(
        &app,
        post(&format!("/task/new/commit/{uuid}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_single_shot_with_seed() {
    let harness = Harness::new();
    let app = harness.app();
    let seed = zip_bytes(&[("opensfm/config.yaml", b"processes: 1")]);

    let (status, json) = send(
        &app,
        post("/task/new")
            .header("Content-Type", multipart_content_type())
            .body(Body::from(multipart_body(&[
                Part::Text("name", "one-shot"),
                Part::Text("options", r#"[{"name":"fast-orthophoto","value":true}]"#),
                Part::File("images", "a.jpg", b"jpeg"),
                Part::File("images", "seed.zip", &seed),
            ])))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");

    let token = RequestToken::parse(json["uuid"].as_str().unwrap()).unwrap();
    assert_eq!(harness.wait_for_job(&token).await, JobStatus::Ready);

    let project = harness.project(&token);
    assert!(project.join("images/a.jpg").exists());
    assert!(project.join("opensfm/config.yaml").exists());
    assert!(!project.join("seed.zip").exists());

    let job = harness.scheduler.get(&token).unwrap();
    assert_eq!(job.record.name.as_deref(), Some("one-shot"));
}

#[tokio::test]
async fn test_health_and_request_id() {
    let harness = Harness::new();
    std::fs::create_dir_all(&harness.config.staging_dir).unwrap();
    let app = harness.app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "trace-me");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["staging"], "available");
    assert_eq!(json["projects"], "missing");
}
