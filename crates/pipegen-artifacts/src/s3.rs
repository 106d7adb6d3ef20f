//! S3 blob store driven through the `aws` CLI.
//!
//! Every transfer is a [`Command`] run by the injected executor, so the
//! store can be exercised with a scripted executor in tests. Expirations come
//! from the bucket's lifecycle rules as reported by `head-object`.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipegen_core::{Command, CommandExecutor, ExecError};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::bundle::BundleTag;
use crate::error::{StorageError, StorageResult};
use crate::store::BlobStore;

/// Object tag key lifecycle rules select on.
pub const RETENTION_TAG_KEY: &str = "retention";

pub struct S3CliBlobStore {
    bucket: String,
    program: String,
    executor: Arc<dyn CommandExecutor>,
}

impl S3CliBlobStore {
    pub fn new(bucket: impl Into<String>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            bucket: bucket.into(),
            program: "aws".to_string(),
            executor,
        }
    }

    /// Use a different CLI binary (for example a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    fn cli<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::new([self.program.clone()]).args(args)
    }

    /// Ask the bucket for the lifecycle expiration of `key`.
    pub async fn expiration(&self, key: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let head = self
            .executor
            .run_checked(&self.cli([
                "s3api",
                "head-object",
                "--bucket",
                self.bucket.as_str(),
                "--key",
                key,
                "--output",
                "json",
            ]))
            .await?;
        parse_expiration(&head.stdout)
    }
}

#[async_trait]
impl BlobStore for S3CliBlobStore {
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        tag: Option<&BundleTag>,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(data)?;
        tmp.flush()?;
        let local = tmp.path().to_string_lossy().to_string();
        let url = self.url(key);

        self.executor
            .run_checked(&self.cli([
                "s3",
                "cp",
                "--only-show-errors",
                local.as_str(),
                url.as_str(),
            ]))
            .await?;

        if let Some(tag) = tag {
            let tagging = format!("TagSet=[{{Key={RETENTION_TAG_KEY},Value={tag}}}]");
            self.executor
                .run_checked(&self.cli([
                    "s3api",
                    "put-object-tagging",
                    "--bucket",
                    self.bucket.as_str(),
                    "--key",
                    key,
                    "--tagging",
                    tagging.as_str(),
                ]))
                .await?;
        }

        self.expiration(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let out = self
            .executor
            .run_checked(&self.cli([
                "s3api",
                "list-objects-v2",
                "--bucket",
                self.bucket.as_str(),
                "--prefix",
                prefix,
                "--output",
                "json",
            ]))
            .await?;
        parse_listing(&out.stdout)
    }

    async fn fetch(&self, key: &str) -> StorageResult<Vec<u8>> {
        let tmp = NamedTempFile::new()?;
        let local = tmp.path().to_string_lossy().to_string();
        let url = self.url(key);
        let cmd = self.cli(["s3", "cp", "--only-show-errors", url.as_str(), local.as_str()]);

        let out = self.executor.run(&cmd).await?;
        if !cmd.accepts(out.exit_code) {
            if out.stderr.contains("404") || out.stderr.contains("Not Found") {
                return Err(StorageError::NotFound {
                    key: key.to_string(),
                });
            }
            return Err(StorageError::Exec(ExecError::UnexpectedExit {
                command: cmd.argv.join(" "),
                exit_code: out.exit_code,
                expected: cmd.expected_exit_codes.clone(),
                stderr: out.stderr,
            }));
        }

        let data = std::fs::read(tmp.path())?;
        debug!(key = %key, bytes = data.len(), "fetched bundle");
        Ok(data)
    }
}

/// Keys from `list-objects-v2` JSON. An empty listing prints nothing.
fn parse_listing(stdout: &str) -> StorageResult<Vec<String>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(stdout)?;
    let mut keys: Vec<String> = value
        .get("Contents")
        .and_then(|c| c.as_array())
        .map(|objects| {
            objects
                .iter()
                .filter_map(|o| o.get("Key").and_then(|k| k.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    keys.sort();
    Ok(keys)
}

/// Expiration from `head-object` JSON, e.g.
/// `"Expiration": "expiry-date=\"Fri, 23 Dec 2022 00:00:00 GMT\", rule-id=\"r\""`.
fn parse_expiration(stdout: &str) -> StorageResult<Option<DateTime<Utc>>> {
    let value: serde_json::Value = serde_json::from_str(stdout)?;
    let Some(expiration) = value.get("Expiration").and_then(|e| e.as_str()) else {
        return Ok(None);
    };

    const FIELD: &str = "expiry-date=\"";
    let date = expiration
        .find(FIELD)
        .map(|start| &expiration[start + FIELD.len()..])
        .and_then(|rest| rest.split('"').next())
        .ok_or_else(|| StorageError::Backend(format!("unparsable expiration: {expiration}")))?;

    DateTime::parse_from_rfc2822(date)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| StorageError::Backend(format!("bad expiry-date `{date}`: {e}")))
}
