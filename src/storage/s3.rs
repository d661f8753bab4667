//! S3 object store

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::Bucket;

use super::{
    ListRequest, ObjectHead, ObjectPage, ObjectStore, ObjectSummary, PutOutcome, StoredObject,
    DEFAULT_CONTENT_TYPE,
};
use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Object store backed by an S3 bucket
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    /// Connect to the bucket described by `config`
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|e| Error::Config(format!("Invalid region '{}': {}", config.region, e)))?,
        };

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                Credentials::new(Some(access_key.as_str()), Some(secret_key.as_str()), None, None, None)
            }
            _ => Credentials::default(),
        }
        .map_err(|e| Error::Config(format!("Failed to resolve S3 credentials: {}", e)))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| Error::Config(format!("Invalid bucket '{}': {}", config.bucket, e)))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        tracing::info!(
            "S3 object store ready: bucket={} region={} path_style={}",
            config.bucket,
            config.region,
            config.path_style
        );

        Ok(Self { bucket })
    }

    fn check_status(key: &str, status: u16, operation: &str) -> Result<()> {
        match status {
            200..=299 => Ok(()),
            404 => Err(Error::NotFound(key.to_string())),
            other => Err(Error::Storage(format!("{} {} returned HTTP {}", operation, key, other))),
        }
    }
}

/// Map a client error, treating a 404 failure as a missing key
fn map_s3_error(key: &str, operation: &str, error: S3Error) -> Error {
    match error {
        S3Error::HttpFailWithBody(404, _) => Error::NotFound(key.to_string()),
        other => Error::Storage(format!("{} {} failed: {}", operation, key, other)),
    }
}

/// S3 uses RFC 3339 in listings and HTTP dates in headers
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        let (head, status) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|e| map_s3_error(key, "HeadObject", e))?;
        Self::check_status(key, status, "HeadObject")?;

        Ok(ObjectHead {
            content_type: head.content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content_length: head.content_length.unwrap_or(0).max(0) as u64,
            last_modified: head
                .last_modified
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| map_s3_error(key, "GetObject", e))?;
        Self::check_status(key, response.status_code(), "GetObject")?;

        let headers = response.headers();
        let content = response.bytes().clone();
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let last_modified = headers
            .get("last-modified")
            .and_then(|v| parse_timestamp(v))
            .unwrap_or_else(Utc::now);

        tracing::debug!("S3 GetObject: {} ({} bytes)", key, content.len());

        Ok(StoredObject {
            head: ObjectHead {
                content_type,
                content_length: content.len() as u64,
                last_modified,
            },
            content,
        })
    }

    async fn put(&self, key: &str, content: Bytes, content_type: Option<&str>) -> Result<PutOutcome> {
        let existed = self.exists(key).await?;
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);

        let response = self
            .bucket
            .put_object_with_content_type(key, &content, content_type)
            .await
            .map_err(|e| map_s3_error(key, "PutObject", e))?;
        Self::check_status(key, response.status_code(), "PutObject")?;

        tracing::debug!("S3 PutObject: {} ({} bytes, {})", key, content.len(), content_type);
        Ok(PutOutcome { created: !existed })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = match self.bucket.delete_object(key).await {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => return Ok(()),
            Err(e) => return Err(map_s3_error(key, "DeleteObject", e)),
        };

        match Self::check_status(key, response.status_code(), "DeleteObject") {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_page(&self, request: ListRequest) -> Result<ObjectPage> {
        let (result, status) = self
            .bucket
            .list_page(
                request.prefix.clone(),
                None,
                request.continuation_token.clone(),
                None,
                Some(request.max_keys),
            )
            .await
            .map_err(|e| Error::Storage(format!("ListObjectsV2 {} failed: {}", request.prefix, e)))?;

        if !(200..300).contains(&status) {
            return Err(Error::Storage(format!(
                "ListObjectsV2 {} returned HTTP {}",
                request.prefix, status
            )));
        }

        let objects = result
            .contents
            .into_iter()
            .map(|object| ObjectSummary {
                last_modified: parse_timestamp(&object.last_modified).unwrap_or_else(Utc::now),
                size: object.size,
                key: object.key,
            })
            .collect();

        let next_continuation_token = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };

        Ok(ObjectPage { objects, next_continuation_token })
    }
}
