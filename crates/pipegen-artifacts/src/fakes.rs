//! In-memory blob store (testing only)
//!
//! `MemoryBlobStore` satisfies the [`BlobStore`] contract without touching
//! disk or network, including tag-based expirations.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bundle::BundleTag;
use crate::error::{StorageError, StorageResult};
use crate::store::{BlobStore, RetentionPolicy};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    tag: Option<BundleTag>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    retention: RetentionPolicy,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            blobs: Mutex::default(),
            retention,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn tag(&self, key: &str) -> Option<BundleTag> {
        self.blobs.lock().unwrap().get(key).and_then(|b| b.tag.clone())
    }

    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.blobs.lock().unwrap().get(key).and_then(|b| b.expires_at)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        tag: Option<&BundleTag>,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let expires_at = self.retention.expires_at(tag, Utc::now());
        self.blobs.lock().unwrap().insert(
            key.to_string(),
            StoredBlob {
                data: data.to_vec(),
                tag: tag.cloned(),
                expires_at,
            },
        );
        Ok(expires_at)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn fetch(&self, key: &str) -> StorageResult<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        blobs
            .get(key)
            .map(|b| b.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }
}
