//! Bundle archive format: a gzip'd tar whose entries all live under
//! [`ARCHIVE_PREFIX`], relative to the job workspace.

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType};

use crate::error::{StagingError, StagingResult};

/// Internal path prefix of every archive entry.
pub const ARCHIVE_PREFIX: &str = "workspace";

/// Pack `files` (relative to `workspace`) into archive bytes.
pub fn pack(workspace: &Path, files: &[PathBuf]) -> StagingResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for rel in files {
        let name = Path::new(ARCHIVE_PREFIX).join(rel);
        builder.append_path_with_name(workspace.join(rel), &name)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Extract an archive read from `reader` into `dest`. Returns the number of
/// files written.
///
/// Entry modification times are preserved, so extracted files predate any
/// timestamp marker recorded afterwards.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> StagingResult<usize> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_mtime(true);
    let mut files = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let rel = relative_to_prefix(&path)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&rel);

        match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target)?;
                files += 1;
            }
            _ => {
                return Err(StagingError::UnsafeEntry {
                    path: path.display().to_string(),
                })
            }
        }
    }

    Ok(files)
}

/// Strip [`ARCHIVE_PREFIX`] and reject anything that could leave `dest`.
fn relative_to_prefix(path: &Path) -> StagingResult<PathBuf> {
    let unsafe_entry = || StagingError::UnsafeEntry {
        path: path.display().to_string(),
    };
    let rel = path.strip_prefix(ARCHIVE_PREFIX).map_err(|_| unsafe_entry())?;
    if rel.components().all(|c| matches!(c, Component::Normal(_))) {
        Ok(rel.to_path_buf())
    } else {
        Err(unsafe_entry())
    }
}
