//! Blob store contract used by the staging protocol.
//!
//! The store is a flat key/value space. Keys are `/`-separated strings; a
//! `put` to an existing key replaces it. Backends:
//! - [`crate::fakes::MemoryBlobStore`]: in-memory, for tests
//! - [`crate::fs::FsBlobStore`]: a local or shared directory
//! - [`crate::s3::S3CliBlobStore`]: an S3 bucket through the `aws` CLI

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::BundleTag;
use crate::error::StorageResult;
use crate::filter::KeyFilter;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous object, and return
    /// the expiration the store computed for it.
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        tag: Option<&BundleTag>,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Bytes stored under `key`, or `StorageError::NotFound`.
    async fn fetch(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Every object under `prefix` whose key passes `filter`, in key order.
    async fn get(&self, prefix: &str, filter: &KeyFilter) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for key in self.list(prefix).await? {
            if filter.matches(&key) {
                let data = self.fetch(&key).await?;
                out.push((key, data));
            }
        }
        Ok(out)
    }
}

/// Retention in days per tag, used by backends that compute expirations
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Days kept when the bundle has no tag or an unlisted tag.
    pub default_days: Option<u32>,
    #[serde(default)]
    pub tags: BTreeMap<String, u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(BundleTag::SuccessfulJob.to_string(), 14);
        tags.insert(BundleTag::FailedJob.to_string(), 30);
        Self {
            default_days: Some(7),
            tags,
        }
    }
}

impl RetentionPolicy {
    /// Keep everything forever.
    pub fn keep_forever() -> Self {
        Self {
            default_days: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn expires_at(&self, tag: Option<&BundleTag>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = tag
            .and_then(|t| self.tags.get(t.as_str()).copied())
            .or(self.default_days)?;
        Some(now + Duration::days(i64::from(days)))
    }
}
