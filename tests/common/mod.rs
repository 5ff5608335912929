#![allow(dead_code)]

use axum::Router;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use task_intake::config::IntakeConfig;
use task_intake::models::RequestToken;
use task_intake::services::intake::IntakeService;
use task_intake::services::options::PassThroughFilter;
use task_intake::services::scheduler::{InMemoryScheduler, JobStatus};
use task_intake::{AppState, create_app};
use tempfile::TempDir;

pub struct Harness {
    pub root: TempDir,
    pub config: Arc<IntakeConfig>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub intake: Arc<IntakeService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Development config rooted in a fresh temp dir, with `share/` as the
    /// only import root.
    pub fn with_config(adjust: impl FnOnce(&mut IntakeConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = IntakeConfig {
            staging_dir: root.path().join("tmp"),
            projects_dir: root.path().join("data"),
            import_path_roots: vec![root.path().join("share")],
            ..IntakeConfig::development()
        };
        adjust(&mut config);
        std::fs::create_dir_all(root.path().join("share")).unwrap();

        let config = Arc::new(config);
        let scheduler = Arc::new(InMemoryScheduler::new());
        let intake = Arc::new(IntakeService::new(
            config.clone(),
            scheduler.clone(),
            Arc::new(PassThroughFilter),
        ));

        Self {
            root,
            config,
            scheduler,
            intake,
        }
    }

    pub fn app(&self) -> Router {
        create_app(AppState {
            intake: self.intake.clone(),
            scheduler: self.scheduler.clone(),
            config: self.config.clone(),
        })
    }

    pub fn share(&self) -> PathBuf {
        self.root.path().join("share")
    }

    pub fn staging(&self, token: &RequestToken) -> PathBuf {
        self.config.staging_dir.join(token.as_str())
    }

    pub fn project(&self, token: &RequestToken) -> PathBuf {
        self.config.projects_dir.join(token.as_str())
    }

    /// Polls the scheduler until the job leaves the queued state.
    pub async fn wait_for_job(&self, token: &RequestToken) -> JobStatus {
        for _ in 0..200 {
            match self.scheduler.status(token) {
                Some(JobStatus::Queued) | None => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                Some(status) => return status,
            }
        }
        panic!("job {token} never left the queue");
    }
}

/// Polls until `path` no longer exists (background removals are async).
pub async fn wait_until_gone(path: &std::path::Path) -> bool {
    for _ in 0..200 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub const BOUNDARY: &str = "----intake-test-boundary";

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, filename, contents) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(contents);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
