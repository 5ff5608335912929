use crate::services::error::IntakeError;
use futures::TryStreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Streams the body of `url` into `dest`. Non-success statuses are errors.
pub async fn download_archive(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<u64, IntakeError> {
    let failed = |reason: String| IntakeError::Download {
        url: url.to_string(),
        reason,
    };

    tracing::info!("Downloading {} to {}", url, dest.display());

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| failed(e.to_string()))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| IntakeError::io(dest, e))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.try_next().await.map_err(|e| failed(e.to_string()))? {
        file.write_all(&chunk)
            .await
            .map_err(|e| IntakeError::io(dest, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| IntakeError::io(dest, e))?;

    tracing::info!("Downloaded {} bytes from {}", written, url);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_download_serves_body() {
        let app = axum::Router::new().route(
            "/archive.zip",
            axum::routing::get(|| async { "zip-bytes" }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("zipurl.zip");
        let client = reqwest::Client::new();

        let written = download_archive(&client, &format!("http://{addr}/archive.zip"), &dest)
            .await
            .unwrap();
        assert_eq!(written, 9);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"zip-bytes");

        let err = download_archive(&client, &format!("http://{addr}/missing.zip"), &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Download { .. }));
    }
}
