//! Remote image download and re-hosting

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Fetches an external image and returns the local reference that replaces it
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn download_remote_image(&self, url: &str, alt: &str) -> Result<String>;
}

/// Downloads over HTTP into the configured upload directory
pub struct HttpImageFetcher {
    client: Client,
    upload_dir: PathBuf,
    public_prefix: String,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.download.user_agent)
            .timeout(Duration::from_secs(config.download.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::ImageDownload(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upload_dir: config.upload_dir(),
            public_prefix: config.download.public_prefix.trim_end_matches('/').to_string(),
            max_bytes: config.download.max_bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn download_remote_image(&self, url: &str, alt: &str) -> Result<String> {
        debug!(%url, %alt, "Downloading remote image");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ImageDownload(format!("HTTP {}: {}", status, url)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_lowercase());

        if let Some(ct) = &content_type {
            if !ct.starts_with("image/") {
                return Err(Error::ImageDownload(format!(
                    "{} is not an image ({})",
                    url, ct
                )));
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(Error::ImageDownload(format!(
                    "{} exceeds {} bytes",
                    url, self.max_bytes
                )));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() > self.max_bytes {
            return Err(Error::ImageDownload(format!(
                "{} exceeds {} bytes",
                url, self.max_bytes
            )));
        }

        let ext = image_extension(url, content_type.as_deref());
        let digest = blake3::hash(&bytes).to_hex().to_string();
        let month = Utc::now().format("%Y%m").to_string();
        let file_name = format!("{}.{}", &digest[..16], ext);

        let dir = self.upload_dir.join(&month);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&file_name);
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, &bytes).await?;
        }

        Ok(format!("{}/{}/{}", self.public_prefix, month, file_name))
    }
}

/// File extension for a downloaded image: URL path first, then content type
fn image_extension(url: &str, content_type: Option<&str>) -> String {
    let from_path = Url::parse(url).ok().and_then(|u| {
        Path::new(u.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    });

    if let Some(ext) = from_path {
        let is_image = mime_guess::from_ext(&ext)
            .first()
            .map(|m| m.type_() == mime_guess::mime::IMAGE)
            .unwrap_or(false);
        if is_image {
            return ext;
        }
    }

    content_type
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|exts| exts.first())
        .map(|e| e.to_string())
        .unwrap_or_else(|| "img".to_string())
}
