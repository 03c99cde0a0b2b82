use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::CloudinaryConfig;

#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub url: String,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct MediaError(pub String);

/// Blob upload boundary. The real implementation talks to Cloudinary; tests
/// inject a fake so no handler or service depends on the provider directly.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, local_path: &Path) -> Result<UploadedMedia, MediaError>;
}

pub struct CloudinaryStore {
    http: reqwest::Client,
    cfg: CloudinaryConfig,
}

impl CloudinaryStore {
    pub fn new(cfg: CloudinaryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, local_path: &Path) -> Result<UploadedMedia, MediaError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| MediaError(format!("reading {}: {e}", local_path.display())))?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_owned();

        let timestamp = Utc::now().timestamp();
        let signature = sign_upload_request(timestamp, &self.cfg.api_secret);

        let form = reqwest::multipart::Form::new()
            .text("api_key", self.cfg.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("signature", signature)
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let endpoint = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cfg.cloud_name
        );

        let resp = self
            .http
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError(format!("upload request: {e}")))?;

        if !resp.status().is_success() {
            return Err(MediaError(format!(
                "upload rejected with status {}",
                resp.status()
            )));
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| MediaError(format!("upload response: {e}")))?;

        tracing::debug!(url = %body.url, "media uploaded");

        Ok(UploadedMedia {
            url: body.secure_url.unwrap_or(body.url),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
    secure_url: Option<String>,
}

/// Cloudinary signs the sorted request params concatenated with the API
/// secret; with `timestamp` as the only signed param this is the whole string.
fn sign_upload_request(timestamp: i64, api_secret: &str) -> String {
    let mut h = Sha1::new();
    h.update(format!("timestamp={timestamp}{api_secret}").as_bytes());
    hex::encode(h.finalize())
}

/// Writes an incoming multipart file part to the temp directory under a
/// uuid-prefixed name, keeping the original extension.
pub async fn spool_to_temp(
    dir: &Path,
    original_name: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let base = Path::new(original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let path = dir.join(format!("{}-{}", Uuid::new_v4(), base));

    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Uploads a spooled temp file and removes it on both the success and the
/// failure path.
pub async fn upload_and_discard(
    media: &dyn MediaStore,
    path: &Path,
) -> Result<UploadedMedia, MediaError> {
    let result = media.upload(path).await;
    let _ = tokio::fs::remove_file(path).await;
    result
}
