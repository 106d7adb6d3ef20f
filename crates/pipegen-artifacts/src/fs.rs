//! Directory-backed [`BlobStore`](crate::store::BlobStore) with a JSON metadata sidecar per object.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::bundle::BundleTag;
use crate::error::{StorageError, StorageResult};
use crate::store::{BlobStore, RetentionPolicy};

/// Sidecar written next to every object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub tag: Option<BundleTag>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Directory-backed blob store, suitable for a shared runner volume.
///
/// Layout: `<root>/objects/<key>` with metadata in `<root>/meta/<key>.json`.
pub struct FsBlobStore {
    objects_dir: PathBuf,
    meta_dir: PathBuf,
    retention: RetentionPolicy,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. Creates the layout if needed.
    pub fn new(root: impl AsRef<Path>, retention: RetentionPolicy) -> StorageResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        let meta_dir = root.as_ref().join("meta");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&meta_dir)?;
        Ok(Self {
            objects_dir,
            meta_dir,
            retention,
        })
    }

    /// Metadata recorded for `key`, if the object exists.
    pub fn meta(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let path = self.meta_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.objects_dir.join(key))
    }

    fn meta_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.meta_dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        tag: Option<&BundleTag>,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let stored_at = Utc::now();
        let meta = ObjectMeta {
            tag: tag.cloned(),
            stored_at,
            expires_at: self.retention.expires_at(tag, stored_at),
        };

        write_atomic(&self.object_path(key)?, data)?;
        write_atomic(&self.meta_path(key)?, &serde_json::to_vec_pretty(&meta)?)?;

        Ok(meta.expires_at)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.objects_dir).min_depth(1) {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.objects_dir)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn fetch(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }
}

/// Write through a temp file in the target directory, then rename over.
fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey {
            component: key.to_string(),
            reason: "must be a relative path without empty, `.` or `..` segments".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::KeyFilter;

    fn make_store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), RetentionPolicy::default()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_fetch() {
        let (_dir, store) = make_store();
        store.put("1/build/a.tar.gz", b"abc", None).await.unwrap();
        assert_eq!(store.fetch("1/build/a.tar.gz").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn put_overwrites() {
        let (_dir, store) = make_store();
        store.put("1/build/a.tar.gz", b"first", None).await.unwrap();
        store
            .put("1/build/a.tar.gz", b"second", Some(&BundleTag::SuccessfulJob))
            .await
            .unwrap();
        assert_eq!(store.fetch("1/build/a.tar.gz").await.unwrap(), b"second");
        let meta = store.meta("1/build/a.tar.gz").unwrap().unwrap();
        assert_eq!(meta.tag, Some(BundleTag::SuccessfulJob));
        assert!(meta.expires_at.is_some());
    }

    #[tokio::test]
    async fn list_is_sorted_and_prefixed() {
        let (_dir, store) = make_store();
        for key in ["2/test/t.tar.gz", "1/test/t.tar.gz", "1/build/b.tar.gz"] {
            store.put(key, b"x", None).await.unwrap();
        }
        assert_eq!(
            store.list("1/").await.unwrap(),
            ["1/build/b.tar.gz", "1/test/t.tar.gz"]
        );
    }

    #[tokio::test]
    async fn get_applies_filter() {
        let (_dir, store) = make_store();
        store.put("1/build/build:centos7.tar.gz", b"b", None).await.unwrap();
        store.put("1/test/test:centos7.tar.gz", b"t", None).await.unwrap();
        let filter = KeyFilter::new(vec![], vec!["*/test/*".to_string()]);
        let got = store.get("1/", &filter).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "1/build/build:centos7.tar.gz");
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let (_dir, store) = make_store();
        let err = store.fetch("1/none.tar.gz").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, store) = make_store();
        for key in ["../x", "/abs", "a//b", "a/./b"] {
            assert!(matches!(
                store.put(key, b"x", None).await,
                Err(StorageError::InvalidKey { .. })
            ));
        }
    }
}
