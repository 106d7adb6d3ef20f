//! Pipegen - CI pipeline generator for hdl/rcc project trees
//!
//! The `pipegen` command runs in two places: once at the top of a pipeline to
//! write the descriptor, and inside every generated job to stage artifacts.
//!
//! ## Commands
//!
//! - `generate`: write the top-level or one child pipeline descriptor
//! - `discover`: print discovered projects and platforms
//! - `directive`: parse a platform directive and print its links
//! - `artifacts download`: fetch earlier stages' bundles into the workspace
//! - `artifacts upload`: pack and store this job's output

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pipegen_artifacts::{
    ArtifactStager, BlobStore, BundleKey, BundleTag, DownloadRequest, DownloadSource,
    FsBlobStore, RetentionPolicy, S3CliBlobStore, UploadRequest, UploadSelection,
    TIMESTAMP_MARKER,
};
use pipegen_ci::{resolve_branches, to_yaml, GeneratorConfig, GraphBuilder};
use pipegen_core::{discover, Directive, PipelineContext, PipelineSpan, ProcessExecutor};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "pipegen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI pipeline generator for hdl/rcc project trees", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Generator config file (default: .pipegen.yml when present)
    #[arg(long, global = true, env = "PIPEGEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a pipeline descriptor
    Generate(GenerateArgs),

    /// Print discovered projects and platforms as JSON
    Discover {
        /// Projects directory (default: projects_dir from config)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Parse a platform directive and print its links as JSON
    Directive {
        /// Directive text (default: the one this pipeline's source selects)
        text: Option<String>,
    },

    /// Hand job output between stages
    Artifacts {
        #[command(flatten)]
        store: StoreArgs,

        #[command(subcommand)]
        action: ArtifactsAction,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Generate the child pipeline of one host/platform pair
    #[arg(long)]
    child: bool,

    /// Host platform of the child pipeline
    #[arg(long)]
    host: Option<String>,

    /// Target platform of the child pipeline
    #[arg(long)]
    platform: Option<String>,

    /// Projects directory (default: projects_dir from config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Write the descriptor here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct StoreArgs {
    /// Directory-backed store root; takes precedence over --bucket
    #[arg(long, env = "PIPEGEN_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Object storage bucket, driven through the aws CLI
    #[arg(long, env = "PIPEGEN_BUCKET")]
    bucket: Option<String>,

    /// Pipeline the bundles belong to
    #[arg(long, env = "CI_PIPELINE_ID")]
    pipeline_id: String,

    /// Job working directory
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
}

#[derive(Subcommand)]
enum ArtifactsAction {
    /// Fetch and extract earlier bundles into the workspace
    Download {
        /// Only bundles matching these globs (default: all)
        #[arg(long)]
        include: Vec<String>,

        /// Skip this pipeline's bundles matching these globs
        #[arg(long)]
        exclude: Vec<String>,

        /// Parent pipeline whose bundles are extracted first
        #[arg(long, env = "PIPEGEN_UPSTREAM_PIPELINE_ID")]
        upstream: Option<String>,
    },

    /// Pack this job's output and store it
    Upload {
        #[arg(long)]
        stage: String,

        #[arg(long)]
        job: String,

        /// Store under the stage's failed-job prefix
        #[arg(long)]
        failed: bool,

        /// Retention tag
        #[arg(long)]
        tag: Option<String>,

        /// Pack files modified after this marker (default: the timestamp marker)
        #[arg(long, conflicts_with = "path")]
        marker: Option<PathBuf>,

        /// Pack one named file or directory instead
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pipegen_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Generate(args) => cmd_generate(cli.config.as_deref(), args).await,
        Commands::Discover { root } => cmd_discover(cli.config.as_deref(), root.as_deref()),
        Commands::Directive { text } => cmd_directive(cli.config.as_deref(), text.as_deref()),
        Commands::Artifacts { store, action } => cmd_artifacts(store, action).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<GeneratorConfig> {
    GeneratorConfig::discover(path).context("Failed to load generator config")
}

fn load_context() -> Result<PipelineContext> {
    PipelineContext::from_env().context("Failed to read pipeline context from the environment")
}

async fn cmd_generate(config_path: Option<&Path>, args: GenerateArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    let context = load_context()?;
    let _span = PipelineSpan::enter(&context.pipeline_id);

    let target = match (args.child, args.host.as_deref(), args.platform.as_deref()) {
        (false, _, _) => None,
        (true, Some(host), Some(platform)) => Some((host, platform)),
        (true, _, _) => bail!("--child needs both --host and --platform"),
    };

    // Only the top level triggers downstream repositories.
    if target.is_none() && !config.downstream.is_empty() {
        resolve_branches(&mut config.downstream, &ProcessExecutor::new()).await;
    }

    let root = args
        .root
        .clone()
        .unwrap_or_else(|| config.projects_dir.clone());
    let yaml = render(&config, &context, &root, target)?;

    match &args.output {
        Some(path) => {
            write_output(path, &yaml)?;
            info!(path = %path.display(), "descriptor written");
        }
        None => print!("{yaml}"),
    }
    Ok(())
}

/// Discover `root` and serialize the requested pipeline.
fn render(
    config: &GeneratorConfig,
    context: &PipelineContext,
    root: &Path,
    target: Option<(&str, &str)>,
) -> Result<String> {
    let inventory = discover(root)
        .with_context(|| format!("Failed to discover projects under {}", root.display()))?;
    let catalog = config.catalog()?;
    let builder = GraphBuilder::new(config, catalog, &inventory, context)?;

    let pipeline = match target {
        Some((host, platform)) => builder
            .child(host, platform)
            .with_context(|| format!("Failed to build child pipeline {host}:{platform}"))?,
        None => builder
            .top_level()
            .context("Failed to build top-level pipeline")?,
    };
    to_yaml(&pipeline).context("Failed to serialize pipeline")
}

fn write_output(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

fn cmd_discover(config_path: Option<&Path>, root: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let root = root.unwrap_or(&config.projects_dir);
    let inventory = discover(root)
        .with_context(|| format!("Failed to discover projects under {}", root.display()))?;
    println!("{}", serde_json::to_string_pretty(&inventory)?);
    Ok(())
}

fn cmd_directive(config_path: Option<&Path>, text: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let directive = match text {
        Some(text) => Directive::parse_with(text, config.colonless_groups)
            .context("Failed to parse directive")?,
        None => load_context()?.directive(config.colonless_groups)?,
    };
    println!("{}", serde_json::to_string_pretty(&directive)?);
    Ok(())
}

fn open_store(args: &StoreArgs) -> Result<Arc<dyn BlobStore>> {
    if let Some(dir) = &args.store_dir {
        let store = FsBlobStore::new(dir, RetentionPolicy::default())
            .with_context(|| format!("Failed to open artifact store at {}", dir.display()))?;
        return Ok(Arc::new(store));
    }
    if let Some(bucket) = &args.bucket {
        return Ok(Arc::new(S3CliBlobStore::new(
            bucket.clone(),
            Arc::new(ProcessExecutor::new()),
        )));
    }
    bail!("No artifact store configured: set --store-dir or --bucket")
}

/// Upstream bundles first so this pipeline's own output wins on overlap.
fn download_request(
    args: &StoreArgs,
    include: Vec<String>,
    exclude: Vec<String>,
    upstream: Option<&str>,
) -> DownloadRequest {
    let mut sources = Vec::new();
    if let Some(upstream) = upstream.filter(|id| *id != args.pipeline_id) {
        sources.push(DownloadSource {
            prefix: BundleKey::pipeline_prefix(upstream),
            exclude: Vec::new(),
        });
    }
    sources.push(DownloadSource {
        prefix: BundleKey::pipeline_prefix(&args.pipeline_id),
        exclude,
    });
    DownloadRequest {
        workspace: args.workspace.clone(),
        sources,
        include,
    }
}

fn upload_request(
    args: &StoreArgs,
    stage: &str,
    job: &str,
    failed: bool,
    tag: Option<String>,
    selection: UploadSelection,
) -> Result<UploadRequest> {
    let key = BundleKey::new(args.pipeline_id.as_str(), stage, job).context("Invalid bundle key")?;
    Ok(UploadRequest {
        workspace: args.workspace.clone(),
        key: if failed { key.failed() } else { key },
        selection,
        tag: tag.map(BundleTag::from),
    })
}

/// Which files an upload packs.
///
/// A failed job may have died before its timestamp marker was touched; its
/// bundle then carries the whole workspace.
fn upload_selection(
    workspace: &Path,
    failed: bool,
    marker: Option<PathBuf>,
    path: Option<PathBuf>,
) -> UploadSelection {
    if let Some(path) = path {
        return UploadSelection::Path(path);
    }
    let marker = marker.unwrap_or_else(|| PathBuf::from(TIMESTAMP_MARKER));
    if failed && !workspace.join(&marker).exists() {
        warn!(marker = %marker.display(), "marker missing, packing the whole workspace");
        return UploadSelection::All;
    }
    UploadSelection::ModifiedSince(marker)
}

async fn cmd_artifacts(args: StoreArgs, action: ArtifactsAction) -> Result<()> {
    let _span = PipelineSpan::enter(&args.pipeline_id);
    let stager = ArtifactStager::new(open_store(&args)?);

    match action {
        ArtifactsAction::Download {
            include,
            exclude,
            upstream,
        } => {
            let req = download_request(&args, include, exclude, upstream.as_deref());
            let report = stager
                .download(&req)
                .await
                .context("Artifact download failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ArtifactsAction::Upload {
            stage,
            job,
            failed,
            tag,
            marker,
            path,
        } => {
            let selection = upload_selection(&args.workspace, failed, marker, path);
            let req = upload_request(&args, &stage, &job, failed, tag, selection)?;
            let report = stager
                .upload(&req)
                .await
                .with_context(|| format!("Artifact upload for {job} failed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use filetime::{set_file_mtime, FileTime};
    use std::collections::HashMap;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn store_args(store: &Path, workspace: &Path, pipeline_id: &str) -> StoreArgs {
        StoreArgs {
            store_dir: Some(store.to_path_buf()),
            bucket: None,
            pipeline_id: pipeline_id.to_string(),
            workspace: workspace.to_path_buf(),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload_flags_as_generated() {
        let cli = Cli::try_parse_from([
            "pipegen",
            "artifacts",
            "--pipeline-id",
            "100",
            "upload",
            "--stage",
            "build",
            "--job",
            "build:centos7",
            "--failed",
            "--tag",
            "failed-job",
        ])
        .unwrap();
        match cli.command {
            Commands::Artifacts {
                store,
                action: ArtifactsAction::Upload { stage, job, failed, tag, .. },
            } => {
                assert_eq!(store.pipeline_id, "100");
                assert_eq!(stage, "build");
                assert_eq!(job, "build:centos7");
                assert!(failed);
                assert_eq!(tag.as_deref(), Some("failed-job"));
            }
            _ => panic!("expected artifacts upload"),
        }
    }

    #[test]
    fn test_marker_conflicts_with_path() {
        let result = Cli::try_parse_from([
            "pipegen",
            "artifacts",
            "--pipeline-id",
            "1",
            "upload",
            "--stage",
            "build",
            "--job",
            "j",
            "--marker",
            "m",
            "--path",
            "p",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_download_request_orders_upstream_first() {
        let args = store_args(Path::new("/store"), Path::new("/ws"), "200");
        let req = download_request(&args, vec![], vec!["*/build/*".into()], Some("100"));
        let prefixes: Vec<_> = req.sources.iter().map(|s| s.prefix.as_str()).collect();
        assert_eq!(prefixes, ["100/", "200/"]);
        assert!(req.sources[0].exclude.is_empty());
        assert_eq!(req.sources[1].exclude, ["*/build/*"]);

        let own = download_request(&args, vec![], vec![], Some("200"));
        assert_eq!(own.sources.len(), 1);
    }

    #[test]
    fn test_open_store_requires_a_backend() {
        let args = StoreArgs {
            store_dir: None,
            bucket: None,
            pipeline_id: "1".into(),
            workspace: PathBuf::from("."),
        };
        assert!(open_store(&args).is_err());
    }

    #[tokio::test]
    async fn test_upload_then_download_between_jobs() {
        let store = tempfile::tempdir().unwrap();
        let producer = tempfile::tempdir().unwrap();
        let consumer = tempfile::tempdir().unwrap();

        let marker = producer.path().join(TIMESTAMP_MARKER);
        touch(&marker);
        set_file_mtime(&marker, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        fs::write(producer.path().join("lib.so"), b"built").unwrap();

        let args = store_args(store.path(), producer.path(), "100");
        cmd_artifacts(
            args,
            ArtifactsAction::Upload {
                stage: "build".into(),
                job: "build:centos7".into(),
                failed: false,
                tag: Some("successful-job".into()),
                marker: None,
                path: None,
            },
        )
        .await
        .unwrap();

        let args = store_args(store.path(), consumer.path(), "100");
        cmd_artifacts(
            args,
            ArtifactsAction::Download {
                include: vec!["*centos7.tar.gz".into()],
                exclude: vec!["*/test/*".into()],
                upstream: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(fs::read(consumer.path().join("lib.so")).unwrap(), b"built");
    }

    #[test]
    fn test_upload_selection_falls_back_for_failed_jobs() {
        let ws = tempfile::tempdir().unwrap();
        assert_eq!(
            upload_selection(ws.path(), true, None, None),
            UploadSelection::All
        );
        assert_eq!(
            upload_selection(ws.path(), false, None, None),
            UploadSelection::ModifiedSince(PathBuf::from(TIMESTAMP_MARKER))
        );

        touch(&ws.path().join(TIMESTAMP_MARKER));
        assert_eq!(
            upload_selection(ws.path(), true, None, None),
            UploadSelection::ModifiedSince(PathBuf::from(TIMESTAMP_MARKER))
        );
        assert_eq!(
            upload_selection(ws.path(), true, None, Some(PathBuf::from("out"))),
            UploadSelection::Path(PathBuf::from("out"))
        );
    }

    #[tokio::test]
    async fn test_failed_upload_without_marker_still_stores_bundle() {
        let store = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        fs::write(ws.path().join("download.log"), b"fetch failed").unwrap();

        cmd_artifacts(
            store_args(store.path(), ws.path(), "100"),
            ArtifactsAction::Upload {
                stage: "build".into(),
                job: "build:centos7".into(),
                failed: true,
                tag: Some("failed-job".into()),
                marker: None,
                path: None,
            },
        )
        .await
        .unwrap();

        let fs_store = FsBlobStore::new(store.path(), RetentionPolicy::default()).unwrap();
        let keys = fs_store.list("100/").await.unwrap();
        assert_eq!(keys, ["100/build-failed/build:centos7.tar.gz"]);
    }

    #[test]
    fn test_render_top_level_and_child() {
        let tree = tempfile::tempdir().unwrap();
        let core = tree.path().join("core");
        touch(&core.join("Project.mk"));
        touch(&core.join("rcc/platforms/centos7/centos7.mk"));
        touch(&core.join("rcc/platforms/centos7/centos7-check.sh"));
        touch(&core.join("rcc/platforms/xilinx13_3/xilinx13_3.mk"));

        let vars: HashMap<&str, &str> = [
            ("CI_PIPELINE_ID", "7"),
            ("CI_PIPELINE_SOURCE", "push"),
            ("CI_COMMIT_REF_NAME", "develop"),
            ("CI_PROJECT_NAMESPACE", "radio"),
            ("CI_COMMIT_MESSAGE", "fix build [ci centos7:xilinx13_3]"),
        ]
        .into_iter()
        .collect();
        let context = PipelineContext::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let config = GeneratorConfig::default();

        let top = render(&config, &context, tree.path(), None).unwrap();
        let top: serde_yaml::Value = serde_yaml::from_str(&top).unwrap();
        assert!(top.get("trigger-children:centos7:xilinx13_3").is_some());

        let target = Some(("centos7", "xilinx13_3"));
        let child = render(&config, &context, tree.path(), target).unwrap();
        let child: serde_yaml::Value = serde_yaml::from_str(&child).unwrap();
        assert_eq!(child["variables"]["PIPEGEN_UPSTREAM_PIPELINE_ID"], "7");
        assert!(child.get("test:centos7:xilinx13_3").is_some());
    }

    #[test]
    fn test_write_output_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".pipegen/centos7-zed.yml");
        write_output(&path, "stages: []\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "stages: []\n");
    }
}
