//! Cross-stage artifact handoff.
//!
//! Every script job brackets its build command with a download of earlier
//! stages' bundles and an upload of whatever the build produced:
//!
//! ```text
//! pipegen artifacts download ...   # fetch + extract earlier bundles
//! touch .pipegen-timestamp         # everything newer is this job's output
//! <build command>
//! touch .pipegen-success
//! pipegen artifacts upload ...     # pack files newer than the marker
//! ```
//!
//! Extracted files keep their archived mtimes, so they predate the marker
//! and are never re-uploaded by the downstream job.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pipegen_core::obs::{emit_artifact_miss, emit_bundle_downloaded, emit_bundle_uploaded};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::archive;
use crate::bundle::{BundleKey, BundleTag};
use crate::error::{StagingError, StagingResult};
use crate::filter::KeyFilter;
use crate::store::BlobStore;

/// Scratch directory inside the workspace that holds fetched archives.
pub const STAGING_DIR: &str = ".pipegen-staging";
/// Touched right before the build command.
pub const TIMESTAMP_MARKER: &str = ".pipegen-timestamp";
/// Touched right after the build command succeeds.
pub const SUCCESS_MARKER: &str = ".pipegen-success";

/// Exclude glob for every bundle of `stage`.
pub fn stage_exclude(stage: &str) -> String {
    format!("*/{stage}/*")
}

/// One key prefix to fetch from, with its own excludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub prefix: String,
    pub exclude: Vec<String>,
}

impl DownloadSource {
    /// Bundles of pipeline `pipeline_id` minus the given stages.
    pub fn pipeline<I, S>(pipeline_id: &str, excluded_stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefix: BundleKey::pipeline_prefix(pipeline_id),
            exclude: excluded_stages
                .into_iter()
                .map(|s| stage_exclude(s.as_ref()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub workspace: PathBuf,
    /// Fetched in order; a later source overwrites files of an earlier one.
    pub sources: Vec<DownloadSource>,
    /// Include globs shared by every source. Empty means everything.
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Keys extracted, in fetch order.
    pub bundles: Vec<String>,
    /// Files written to the workspace.
    pub files: usize,
}

/// Which workspace files an upload packs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSelection {
    /// Regular files modified after this marker file.
    ModifiedSince(PathBuf),
    /// A single named file or directory.
    Path(PathBuf),
    /// Every regular file in the workspace.
    All,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub workspace: PathBuf,
    pub key: BundleKey,
    pub selection: UploadSelection,
    pub tag: Option<BundleTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub key: String,
    pub files: usize,
    pub bytes: usize,
    /// Hex SHA-256 of the archive bytes.
    pub digest: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Runs the download/upload halves of the protocol against a blob store.
pub struct ArtifactStager {
    store: Arc<dyn BlobStore>,
}

impl ArtifactStager {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Fetch and extract every matching bundle into the workspace.
    ///
    /// Failed-job bundles are always excluded. A source that matches nothing
    /// is logged and skipped.
    pub async fn download(&self, req: &DownloadRequest) -> StagingResult<DownloadReport> {
        let staging = req.workspace.join(STAGING_DIR);
        fs::create_dir_all(&staging)?;
        let mut report = DownloadReport::default();

        for source in &req.sources {
            let filter =
                KeyFilter::new(req.include.clone(), source.exclude.clone()).excluding_failed();
            let bundles = self.store.get(&source.prefix, &filter).await?;
            if bundles.is_empty() {
                emit_artifact_miss(&source.prefix);
                continue;
            }

            for (key, data) in bundles {
                let archive_path = staging.join(safe_relative(Path::new(&key))?);
                if let Some(parent) = archive_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&archive_path, &data)?;

                let files = archive::unpack(fs::File::open(&archive_path)?, &req.workspace)?;
                fs::remove_file(&archive_path)?;

                emit_bundle_downloaded(&key, files);
                report.files += files;
                report.bundles.push(key);
            }
        }

        prune_empty_dirs(&staging)?;
        Ok(report)
    }

    /// Pack the selected files and store them under the request's key.
    pub async fn upload(&self, req: &UploadRequest) -> StagingResult<UploadReport> {
        let files = match &req.selection {
            UploadSelection::ModifiedSince(marker) => modified_since(&req.workspace, marker)?,
            UploadSelection::Path(path) => named_path(&req.workspace, path)?,
            UploadSelection::All => all_files(&req.workspace)?,
        };
        debug!(files = files.len(), "collected upload set");

        let data = archive::pack(&req.workspace, &files)?;
        let digest = hex::encode(Sha256::digest(&data));
        let key = req.key.to_string();

        let expires_at = self.store.put(&key, &data, req.tag.as_ref()).await?;
        match expires_at {
            Some(when) => info!(key = %key, expires_at = %when, "bundle expiration"),
            None => info!(key = %key, "bundle has no expiration"),
        }
        emit_bundle_uploaded(&key, files.len(), data.len(), &digest);

        Ok(UploadReport {
            key,
            files: files.len(),
            bytes: data.len(),
            digest,
            expires_at,
        })
    }
}

/// Workspace-relative paths of regular files newer than `marker`.
fn modified_since(workspace: &Path, marker: &Path) -> StagingResult<Vec<PathBuf>> {
    let marker_path = workspace.join(marker);
    let threshold = match fs::metadata(&marker_path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StagingError::MarkerMissing(marker_path))
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in walk(workspace) {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path() == marker_path {
            continue;
        }
        if entry.metadata()?.modified()? > threshold {
            files.push(relative(workspace, entry.path())?);
        }
    }
    Ok(files)
}

/// Workspace-relative paths for one named file, or every file beneath a
/// named directory.
fn named_path(workspace: &Path, path: &Path) -> StagingResult<Vec<PathBuf>> {
    let rel = if path.is_absolute() {
        path.strip_prefix(workspace)
            .map_err(|_| StagingError::ArtifactMissing(path.to_path_buf()))?
            .to_path_buf()
    } else {
        safe_relative(path)?
    };
    let full = workspace.join(&rel);

    if full.is_file() {
        return Ok(vec![rel]);
    }
    if !full.is_dir() {
        return Err(StagingError::ArtifactMissing(full));
    }

    let mut files = Vec::new();
    for entry in walk(&full) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(relative(workspace, entry.path())?);
        }
    }
    Ok(files)
}

fn all_files(workspace: &Path) -> StagingResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walk(workspace) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(relative(workspace, entry.path())?);
        }
    }
    Ok(files)
}

fn walk(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    match entry.depth() {
        1 => matches!(
            name.as_ref(),
            STAGING_DIR | ".git" | TIMESTAMP_MARKER | SUCCESS_MARKER
        ),
        _ => false,
    }
}

fn relative(workspace: &Path, path: &Path) -> StagingResult<PathBuf> {
    path.strip_prefix(workspace)
        .map(Path::to_path_buf)
        .map_err(|_| StagingError::UnsafeEntry {
            path: path.display().to_string(),
        })
}

fn safe_relative(path: &Path) -> StagingResult<PathBuf> {
    if path.components().all(|c| matches!(c, Component::Normal(_))) {
        Ok(path.to_path_buf())
    } else {
        Err(StagingError::UnsafeEntry {
            path: path.display().to_string(),
        })
    }
}

/// Remove every empty directory under and including `root`.
fn prune_empty_dirs(root: &Path) -> StagingResult<()> {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_dir() && fs::read_dir(entry.path())?.next().is_none() {
            fs::remove_dir(entry.path())?;
        }
    }
    Ok(())
}
