use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("presign config error: {0}")]
    PresignConfig(String),

    #[error("{op} failed: {message}")]
    Request { op: &'static str, message: String },
}

impl StorageError {
    fn request(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Request { op, message: err.to_string() }
    }
}

/// Connection settings for an S3-compatible store (Cloudflare R2, MinIO, AWS).
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct ObjectStorage {
    client: S3Client,
    bucket: String,
}

impl ObjectStorage {
    pub fn new(settings: &StorageSettings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "atrium-static",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&settings.endpoint)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        tracing::info!(endpoint = %settings.endpoint, bucket = %settings.bucket, "object storage client initialized");

        Self {
            client: S3Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    /// Create the bucket when missing. MinIO in development needs this, R2 and
    /// AWS buckets are provisioned out of band.
    pub async fn ensure_bucket(&self) {
        if let Err(e) = self.client.create_bucket().bucket(&self.bucket).send().await {
            tracing::debug!(bucket = %self.bucket, error = %e, "create_bucket skipped");
        }
    }

    pub async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::request("upload", e))?;

        tracing::debug!(key = %key, content_type = %content_type, "object uploaded");
        Ok(())
    }

    /// Presigned GET for reading `key` without further authentication.
    pub async fn presigned_get(&self, key: &str, expires_secs: u64) -> Result<String, StorageError> {
        let request = self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config(expires_secs)?)
            .await
            .map_err(|e| StorageError::request("presign get", e))?;

        Ok(request.uri().to_string())
    }

    /// Presigned PUT; the uploader must send the same `Content-Type`.
    pub async fn presigned_put(
        &self,
        key: &str,
        content_type: &str,
        expires_secs: u64,
    ) -> Result<String, StorageError> {
        let request = self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presign_config(expires_secs)?)
            .await
            .map_err(|e| StorageError::request("presign put", e))?;

        Ok(request.uri().to_string())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::request("delete", e))?;

        Ok(())
    }

    /// Whether `key` exists in the bucket.
    pub async fn head_object(&self, key: &str) -> Result<bool, StorageError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::request("head object", e)),
        }
    }

    /// Reachability check used by `/health`.
    pub async fn head_bucket(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::request("head bucket", e))?;
        Ok(())
    }
}

fn presign_config(expires_secs: u64) -> Result<PresigningConfig, StorageError> {
    PresigningConfig::builder()
        .expires_in(Duration::from_secs(expires_secs))
        .build()
        .map_err(|e| StorageError::PresignConfig(e.to_string()))
}
