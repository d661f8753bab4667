//! Object Store Gateway
//!
//! Key-addressed blob storage behind a single trait. The S3 backend talks to
//! S3 or any S3-compatible service; the memory backend keeps objects in the
//! process and is used for local runs and tests.

mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Content type used when the caller does not provide one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_type: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
}

/// Object content plus metadata
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub head: ObjectHead,
    pub content: Bytes,
}

/// Result of a put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// False when an existing key was overwritten
    pub created: bool,
}

/// One entry of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Parameters of one list call
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Key prefix; ignored by backends that encode it in the token
    pub prefix: String,
    /// Opaque cursor from a previous page
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

/// One page of a listing, ordered by key
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
}

/// Operations the API needs from an object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `key` exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Metadata for `key`, `Error::NotFound` if absent
    async fn head(&self, key: &str) -> Result<ObjectHead>;

    /// Content and metadata for `key`, `Error::NotFound` if absent
    async fn get(&self, key: &str) -> Result<StoredObject>;

    /// Create or overwrite `key`
    async fn put(&self, key: &str, content: Bytes, content_type: Option<&str>) -> Result<PutOutcome>;

    /// Remove `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// List up to `max_keys` objects in key order
    async fn list_page(&self, request: ListRequest) -> Result<ObjectPage>;
}

/// Build the configured backend
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::S3 => Ok(Arc::new(S3ObjectStore::from_config(config)?)),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory object store; contents are lost on restart");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
    }
}
