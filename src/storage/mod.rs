//! Storage - Alarm Image Upload Backends
//!
//! ## Responsibilities
//!
//! - Persist an alarm frame and return a URL a notification can link to
//! - Local directory backend (default)
//! - Cloudinary backend (fixed public id, overwritten on every alarm)

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend selector (`STORAGE_BACKEND`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Cloudinary,
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloudinary" => Ok(Self::Cloudinary),
            other => Err(Error::Config(format!("unknown storage backend: {}", other))),
        }
    }
}

/// Upload target for alarm images (PNG bytes in, URL out)
#[async_trait]
pub trait ImageStorage: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, png: Vec<u8>) -> Result<String>;
}

/// Writes `alarm_<timestamp>_<id>.png` into a directory
pub struct LocalStorage {
    dir: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStorage {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl ImageStorage for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, png: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let filename = format!(
            "alarm_{}_{}.png",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, &png).await?;

        tracing::debug!(path = %path.display(), bytes = png.len(), "Alarm image stored");

        Ok(match &self.public_base_url {
            Some(base) => format!("{}/{}", base, filename),
            None => format!("file://{}", path.display()),
        })
    }
}

/// Cloudinary credentials
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

const CLOUDINARY_PUBLIC_ID: &str = "latest_photo";

#[derive(Debug, Deserialize)]
struct CloudinaryUploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

/// Signed upload to Cloudinary; every alarm overwrites the same public id
pub struct CloudinaryStorage {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryStorage {
    pub fn new(config: CloudinaryConfig) -> Result<Self> {
        if config.cloud_name.is_empty() || config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(Error::Config(
                "cloudinary backend requires CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET"
                    .to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    /// Request signature: sha1 over the sorted params followed by the secret
    fn sign(&self, timestamp: i64) -> String {
        let to_sign = format!(
            "overwrite=true&public_id={}&timestamp={}{}",
            CLOUDINARY_PUBLIC_ID, timestamp, self.config.api_secret
        );
        let digest = Sha1::digest(to_sign.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[async_trait]
impl ImageStorage for CloudinaryStorage {
    fn name(&self) -> &str {
        "cloudinary"
    }

    async fn upload(&self, png: Vec<u8>) -> Result<String> {
        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.config.cloud_name
        );
        let timestamp = Utc::now().timestamp();

        let part = reqwest::multipart::Part::bytes(png)
            .file_name("alarm.png")
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("public_id", CLOUDINARY_PUBLIC_ID)
            .text("overwrite", "true")
            .text("signature", self.sign(timestamp));

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "cloudinary upload failed: {} {}",
                status, body
            )));
        }

        let parsed: CloudinaryUploadResponse = resp.json().await?;
        parsed
            .secure_url
            .or(parsed.url)
            .ok_or_else(|| Error::Storage("cloudinary response missing url".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!(
            " Cloudinary ".parse::<StorageBackend>().unwrap(),
            StorageBackend::Cloudinary
        );
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_cloudinary_requires_credentials() {
        let result = CloudinaryStorage::new(CloudinaryConfig {
            cloud_name: "demo".to_string(),
            api_key: String::new(),
            api_secret: "s".to_string(),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cloudinary_signature_is_hex_sha1() {
        let storage = CloudinaryStorage::new(CloudinaryConfig {
            cloud_name: "demo".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        })
        .unwrap();
        let sig = storage.sign(1_700_000_000);
        assert_eq!(sig.len(), 40);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, storage.sign(1_700_000_000));
        assert_ne!(sig, storage.sign(1_700_000_001));
    }

    #[tokio::test]
    async fn test_local_storage_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), Some("http://cam.local/alarms/".to_string()));

        let url = storage.upload(vec![1, 2, 3]).await.unwrap();
        assert!(url.starts_with("http://cam.local/alarms/alarm_"));
        assert!(url.ends_with(".png"));

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
