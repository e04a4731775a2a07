use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use uuid::Uuid;

use crate::config::AppConfig;

/// Lifetime of signed download references handed to callers.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Stores `bytes` at `path` and returns the path under which they can be
    /// retrieved.
    async fn store(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<String>;

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Some attachments predate the blob store and were saved as absolute URLs;
/// those are returned untouched. Everything else is signed for one hour.
pub async fn resolve_file_url(store: &dyn BlobStore, path: &str) -> Result<String> {
    if path.starts_with("http") {
        return Ok(path.to_string());
    }
    store.signed_url(path, SIGNED_URL_TTL).await
}

pub fn revision_file_path(document_id: Uuid, revision_id: Uuid, file_name: &str) -> String {
    let safe_name: String = file_name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' => '_',
            _ => ch,
        })
        .collect();
    format!("documents/{document_id}/revisions/{revision_id}/{safe_name}")
}

pub fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client = build_client(config).await?;
        Ok(Self::new(client, config.s3_bucket.clone()))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<String> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .context("failed to upload revision file to S3")?;

        Ok(path.to_string())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presign_config)
            .await
            .context("failed to generate signed download URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .context("failed to delete object from S3")?;
        Ok(())
    }
}

async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region = Region::new(config.aws_region.clone());
    let region_provider = RegionProviderChain::first_try(Some(region))
        .or_default_provider()
        .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.clone(),
        config.aws_secret_access_key.clone(),
    ) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");
        loader = loader.credentials_provider(credentials);
    }

    let base_config = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    Ok(S3Client::from_conf(s3_config))
}
