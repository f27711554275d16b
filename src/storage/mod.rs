//! Blob storage capability (§4.12). `BlobStore` is a trait so the live
//! filesystem-backed implementation and the in-memory test double compose
//! the same way `PushProvider` does — selected once at startup, never
//! branched on at call sites.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub upload_url: String,
    pub object_key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DownloadTicket {
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

fn object_key(owner_id: Uuid, file_id: Uuid, filename: &str) -> String {
    format!("users/{owner_id}/{file_id}/{filename}")
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn issue_upload_url(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        filename: &str,
        ttl: Duration,
    ) -> AppResult<UploadTicket>;

    async fn confirm_upload(&self, object_key: &str) -> AppResult<u64>;

    async fn issue_download_url(&self, object_key: &str, ttl: Duration) -> AppResult<DownloadTicket>;

    /// Deletes uploads whose presigned URL expired without a confirmed
    /// write. Run periodically by a background sweeper (§4.12).
    async fn sweep_expired_uploads(&self) -> AppResult<u64>;
}

/// Filesystem-backed store standing in for an object-storage bucket. Upload
/// URLs point back at this process's own `/files/{key}` route rather than a
/// signed cloud-storage URL, since there's no bucket to sign against in a
/// self-hosted deployment.
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, base_url: String) -> Self {
        Self { root, base_url }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn issue_upload_url(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        filename: &str,
        ttl: Duration,
    ) -> AppResult<UploadTicket> {
        let key = object_key(owner_id, file_id, filename);
        let path = self.path_for(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                tracing::error!(error = ?e, "failed to prepare upload directory");
                AppError::Internal
            })?;
        }
        Ok(UploadTicket {
            upload_url: format!("{}/uploads/{key}", self.base_url),
            object_key: key,
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        })
    }

    async fn confirm_upload(&self, object_key: &str) -> AppResult<u64> {
        let meta = tokio::fs::metadata(self.path_for(object_key))
            .await
            .map_err(|_| AppError::NotFound("uploaded object not found".into()))?;
        Ok(meta.len())
    }

    async fn issue_download_url(&self, object_key: &str, ttl: Duration) -> AppResult<DownloadTicket> {
        if tokio::fs::metadata(self.path_for(object_key)).await.is_err() {
            return Err(AppError::NotFound("object not found".into()));
        }
        Ok(DownloadTicket {
            download_url: format!("{}/files/{object_key}", self.base_url),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        })
    }

    async fn sweep_expired_uploads(&self) -> AppResult<u64> {
        // A real deployment tracks pending-upload expiry in the database
        // (file_records.status = 'pending') and deletes the backing object
        // when swept; the filesystem store has no independent expiry clock.
        Ok(0)
    }
}

/// In-memory double for tests: records issued tickets, treats every key as
/// "uploaded" once `confirm_upload` is called.
pub struct TestBlobStore {
    confirmed: Mutex<std::collections::HashSet<String>>,
}

impl TestBlobStore {
    pub fn new() -> Self {
        Self {
            confirmed: Mutex::new(std::collections::HashSet::new()),
        }
    }
}

impl Default for TestBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for TestBlobStore {
    async fn issue_upload_url(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        filename: &str,
        ttl: Duration,
    ) -> AppResult<UploadTicket> {
        let key = object_key(owner_id, file_id, filename);
        Ok(UploadTicket {
            upload_url: format!("memory://upload/{key}"),
            object_key: key,
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        })
    }

    async fn confirm_upload(&self, object_key: &str) -> AppResult<u64> {
        self.confirmed.lock().await.insert(object_key.to_string());
        Ok(0)
    }

    async fn issue_download_url(&self, object_key: &str, ttl: Duration) -> AppResult<DownloadTicket> {
        if !self.confirmed.lock().await.contains(object_key) {
            return Err(AppError::NotFound("object not found".into()));
        }
        Ok(DownloadTicket {
            download_url: format!("memory://download/{object_key}"),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        })
    }

    async fn sweep_expired_uploads(&self) -> AppResult<u64> {
        Ok(0)
    }
}
