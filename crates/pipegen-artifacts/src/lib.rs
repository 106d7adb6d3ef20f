//! Pipegen Artifacts
//!
//! Bundles of job output handed between independently scheduled CI jobs:
//! - [`bundle`]: `<pipeline>/<stage>[-failed]/<job>.tar.gz` keys and tags
//! - [`store`]: the [`BlobStore`] contract, with [`fs`], [`s3`] and
//!   in-memory ([`fakes`]) backends
//! - [`staging`]: the download/upload protocol every script job runs

pub mod archive;
pub mod bundle;
pub mod error;
pub mod fakes;
pub mod filter;
pub mod fs;
pub mod s3;
pub mod staging;
pub mod store;

pub use bundle::{BundleKey, BundleTag};
pub use error::{StagingError, StagingResult, StorageError, StorageResult};
pub use filter::{KeyFilter, FAILED_EXCLUDE};
pub use fs::FsBlobStore;
pub use s3::S3CliBlobStore;
pub use staging::{
    ArtifactStager, DownloadReport, DownloadRequest, DownloadSource, UploadReport, UploadRequest,
    UploadSelection, STAGING_DIR, SUCCESS_MARKER, TIMESTAMP_MARKER,
};
pub use store::{BlobStore, RetentionPolicy};
