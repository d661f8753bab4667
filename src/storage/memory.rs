//! In-memory object store

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

use super::{
    ListRequest, ObjectHead, ObjectPage, ObjectStore, ObjectSummary, PutOutcome, StoredObject,
    DEFAULT_CONTENT_TYPE,
};
use crate::error::{Error, Result};

/// Object store backed by an ordered map
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the store holds no objects
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

/// Cursor encoded in a continuation token: the listing prefix and the last key served.
///
/// Layout before hex encoding: prefix length (u32 big-endian), prefix, last key.
fn encode_token(prefix: &str, last_key: &str) -> String {
    let mut raw = Vec::with_capacity(4 + prefix.len() + last_key.len());
    raw.extend_from_slice(&(prefix.len() as u32).to_be_bytes());
    raw.extend_from_slice(prefix.as_bytes());
    raw.extend_from_slice(last_key.as_bytes());
    hex::encode(raw)
}

fn decode_token(token: &str) -> Result<(String, String)> {
    let invalid = || Error::validation("Invalid page_token", token);

    let raw = hex::decode(token).map_err(|_| invalid())?;
    if raw.len() < 4 {
        return Err(invalid());
    }
    let (len, rest) = raw.split_at(4);
    let prefix_len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if prefix_len > rest.len() {
        return Err(invalid());
    }
    let (prefix, last_key) = rest.split_at(prefix_len);

    let prefix = String::from_utf8(prefix.to_vec()).map_err(|_| invalid())?;
    let last_key = String::from_utf8(last_key.to_vec()).map_err(|_| invalid())?;
    Ok((prefix, last_key))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|object| object.head.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, content: Bytes, content_type: Option<&str>) -> Result<PutOutcome> {
        let object = StoredObject {
            head: ObjectHead {
                content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
                content_length: content.len() as u64,
                last_modified: Utc::now(),
            },
            content,
        };

        let previous = self.objects.write().await.insert(key.to_string(), object);
        Ok(PutOutcome { created: previous.is_none() })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list_page(&self, request: ListRequest) -> Result<ObjectPage> {
        let (prefix, lower) = match &request.continuation_token {
            Some(token) => {
                let (prefix, last_key) = decode_token(token)?;
                (prefix, Bound::Excluded(last_key))
            }
            None => (request.prefix.clone(), Bound::Included(request.prefix.clone())),
        };

        let objects = self.objects.read().await;
        let mut matching = objects
            .range::<String, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix));

        let page: Vec<ObjectSummary> = matching
            .by_ref()
            .take(request.max_keys)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                last_modified: object.head.last_modified,
                size: object.head.content_length,
            })
            .collect();

        let has_more = matching.next().is_some();
        let next_continuation_token = match page.last() {
            Some(last) if has_more => Some(encode_token(&prefix, &last.key)),
            _ => None,
        };

        Ok(ObjectPage { objects: page, next_continuation_token })
    }
}
