//! End-to-end download/upload across simulated jobs sharing one store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use pipegen_artifacts::fakes::MemoryBlobStore;
use pipegen_artifacts::{
    ArtifactStager, BundleKey, BundleTag, DownloadRequest, DownloadSource, UploadRequest,
    UploadSelection, STAGING_DIR, TIMESTAMP_MARKER,
};

const MARKER_TIME: i64 = 1_700_000_000;

fn write_at(path: &Path, body: &[u8], unix_secs: i64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(unix_secs, 0)).unwrap();
}

/// Run the upload half of one job: marker first, then its outputs.
async fn run_job(
    stager: &ArtifactStager,
    key: BundleKey,
    outputs: &[(&str, &str)],
    tag: BundleTag,
) -> pipegen_artifacts::UploadReport {
    let ws = tempfile::tempdir().unwrap();
    write_at(&ws.path().join(TIMESTAMP_MARKER), b"", MARKER_TIME);
    write_at(&ws.path().join("stale.txt"), b"old", MARKER_TIME - 60);
    for (rel, body) in outputs {
        write_at(&ws.path().join(rel), body.as_bytes(), MARKER_TIME + 10);
    }
    stager
        .upload(&UploadRequest {
            workspace: ws.path().to_path_buf(),
            key,
            selection: UploadSelection::ModifiedSince(PathBuf::from(TIMESTAMP_MARKER)),
            tag: Some(tag),
        })
        .await
        .unwrap()
}

fn setup() -> (Arc<MemoryBlobStore>, ArtifactStager) {
    let store = Arc::new(MemoryBlobStore::new());
    let stager = ArtifactStager::new(store.clone());
    (store, stager)
}

#[tokio::test]
async fn test_upload_packs_only_files_newer_than_marker() {
    let (store, stager) = setup();
    let report = run_job(
        &stager,
        BundleKey::new("1", "build", "build:centos7").unwrap(),
        &[("lib/libocpi.so", "elf"), ("exports/manifest", "m")],
        BundleTag::SuccessfulJob,
    )
    .await;

    assert_eq!(report.files, 2, "stale.txt and the marker stay behind");
    assert_eq!(store.tag(&report.key), Some(BundleTag::SuccessfulJob));
    assert!(report.expires_at.is_some());
}

#[tokio::test]
async fn test_download_restores_files_with_original_mtimes() {
    let (_store, stager) = setup();
    run_job(
        &stager,
        BundleKey::new("1", "build", "build:centos7").unwrap(),
        &[("lib/libocpi.so", "elf")],
        BundleTag::SuccessfulJob,
    )
    .await;

    let ws = tempfile::tempdir().unwrap();
    let report = stager
        .download(&DownloadRequest {
            workspace: ws.path().to_path_buf(),
            sources: vec![DownloadSource::pipeline("1", ["test"])],
            include: vec!["*centos7.tar.gz".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(report.bundles, ["1/build/build:centos7.tar.gz"]);
    assert_eq!(report.files, 1);
    let lib = ws.path().join("lib/libocpi.so");
    assert_eq!(fs::read(&lib).unwrap(), b"elf");
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&lib).unwrap());
    assert_eq!(mtime.unix_seconds(), MARKER_TIME + 10);
    assert!(!ws.path().join(STAGING_DIR).exists(), "staging dir is pruned");
}

#[tokio::test]
async fn test_same_key_twice_overwrites() {
    let (store, stager) = setup();
    let key = BundleKey::new("1", "build", "build:centos7").unwrap();
    run_job(&stager, key.clone(), &[("out.bin", "first")], BundleTag::SuccessfulJob).await;
    run_job(&stager, key.clone(), &[("out.bin", "second")], BundleTag::SuccessfulJob).await;

    assert_eq!(store.keys(), ["1/build/build:centos7.tar.gz"]);

    let ws = tempfile::tempdir().unwrap();
    stager
        .download(&DownloadRequest {
            workspace: ws.path().to_path_buf(),
            sources: vec![DownloadSource::pipeline("1", Vec::<String>::new())],
            include: vec![],
        })
        .await
        .unwrap();
    assert_eq!(fs::read(ws.path().join("out.bin")).unwrap(), b"second");
}

#[tokio::test]
async fn test_current_stage_and_failed_bundles_are_excluded() {
    let (_store, stager) = setup();
    run_job(
        &stager,
        BundleKey::new("1", "build", "build:centos7").unwrap(),
        &[("build.out", "b")],
        BundleTag::SuccessfulJob,
    )
    .await;
    run_job(
        &stager,
        BundleKey::new("1", "test", "test:centos7").unwrap(),
        &[("test.out", "t")],
        BundleTag::SuccessfulJob,
    )
    .await;
    run_job(
        &stager,
        BundleKey::new("1", "build", "build:centos7").unwrap().failed(),
        &[("failed.out", "f")],
        BundleTag::FailedJob,
    )
    .await;

    let ws = tempfile::tempdir().unwrap();
    let report = stager
        .download(&DownloadRequest {
            workspace: ws.path().to_path_buf(),
            sources: vec![DownloadSource::pipeline("1", ["test"])],
            include: vec!["*centos7.tar.gz".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(report.bundles, ["1/build/build:centos7.tar.gz"]);
    assert!(ws.path().join("build.out").exists());
    assert!(!ws.path().join("test.out").exists());
    assert!(!ws.path().join("failed.out").exists());
}

#[tokio::test]
async fn test_child_reads_upstream_and_own_pipeline() {
    let (_store, stager) = setup();
    run_job(
        &stager,
        BundleKey::new("100", "build", "build:centos7").unwrap(),
        &[("host.out", "h")],
        BundleTag::SuccessfulJob,
    )
    .await;
    run_job(
        &stager,
        BundleKey::new("101", "build-primitives", "build-primitives:core:primitives:centos7:zed")
            .unwrap(),
        &[("prims.out", "p")],
        BundleTag::SuccessfulJob,
    )
    .await;
    run_job(
        &stager,
        BundleKey::new("100", "build", "build:ubuntu18_04").unwrap(),
        &[("other.out", "o")],
        BundleTag::SuccessfulJob,
    )
    .await;

    let ws = tempfile::tempdir().unwrap();
    let report = stager
        .download(&DownloadRequest {
            workspace: ws.path().to_path_buf(),
            sources: vec![
                DownloadSource::pipeline("100", Vec::<String>::new()),
                DownloadSource::pipeline("101", ["build-libraries", "build-platforms"]),
            ],
            include: vec!["*centos7.tar.gz".to_string(), "*zed.tar.gz".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(report.bundles.len(), 2);
    assert!(ws.path().join("host.out").exists());
    assert!(ws.path().join("prims.out").exists());
    assert!(!ws.path().join("other.out").exists());
}

#[tokio::test]
async fn test_downloaded_files_are_not_reuploaded() {
    let (store, stager) = setup();
    run_job(
        &stager,
        BundleKey::new("1", "build", "build:centos7").unwrap(),
        &[("lib/dep.so", "dep")],
        BundleTag::SuccessfulJob,
    )
    .await;

    let ws = tempfile::tempdir().unwrap();
    stager
        .download(&DownloadRequest {
            workspace: ws.path().to_path_buf(),
            sources: vec![DownloadSource::pipeline("1", ["test"])],
            include: vec![],
        })
        .await
        .unwrap();

    // The test job records its marker after download, then produces output.
    let later = MARKER_TIME + 1_000;
    write_at(&ws.path().join(TIMESTAMP_MARKER), b"", later);
    write_at(&ws.path().join("results.xml"), b"<ok/>", later + 5);

    let report = stager
        .upload(&UploadRequest {
            workspace: ws.path().to_path_buf(),
            key: BundleKey::new("1", "test", "test:centos7").unwrap(),
            selection: UploadSelection::ModifiedSince(PathBuf::from(TIMESTAMP_MARKER)),
            tag: Some(BundleTag::SuccessfulJob),
        })
        .await
        .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(store.keys().len(), 2);
}
