//! Generator configuration loaded from YAML.
//!
//! Everything here is static per repository; per-run state lives in
//! [`pipegen_core::PipelineContext`]. A missing file means all defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pipegen_core::ColonlessGroup;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downstream::DownstreamRepo;
use crate::error::{ConfigError, ConfigResult};
use crate::stage::StageCatalog;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".pipegen.yml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Directory holding one sub-directory per project.
    pub projects_dir: PathBuf,
    /// Project whose primitives build in `build-primitives-core`.
    pub core_project: String,
    /// Hosts used when the directive names none.
    pub default_hosts: Vec<String>,
    /// Built-in stage catalog to use when `stages` is absent.
    pub stage_version: String,
    /// Explicit stage lists, overriding `stage_version`.
    pub stages: Option<StageCatalog>,
    pub colonless_groups: ColonlessGroup,
    pub downstream: Vec<DownstreamRepo>,
    /// Generator invocation embedded in job scripts.
    pub generator: String,
    /// Build tool invoked by job scripts.
    pub build_tool: String,
    /// Where generate jobs write child descriptors; kept as CI artifacts.
    pub ci_dir: String,
    /// Extra runner tags per host platform.
    pub runner_tags: BTreeMap<String, Vec<String>>,
    /// File this config was read from, passed on to child generation.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("projects"),
            core_project: "core".to_string(),
            default_hosts: vec!["centos7".to_string()],
            stage_version: StageCatalog::DEFAULT_VERSION.to_string(),
            stages: None,
            colonless_groups: ColonlessGroup::default(),
            downstream: Vec::new(),
            generator: "pipegen".to_string(),
            build_tool: "make".to_string(),
            ci_dir: ".pipegen".to_string(),
            runner_tags: BTreeMap::new(),
            source: None,
        }
    }
}

impl GeneratorConfig {
    pub fn from_yaml(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.catalog()?;
        Ok(config)
    }

    /// Read `path`, remembering it so generated jobs pass it along.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.source = Some(path.to_path_buf());
        debug!(path = %path.display(), "loaded generator config");
        Ok(config)
    }

    /// Load `path` if given, else [`CONFIG_FILE`] if present, else defaults.
    pub fn discover(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).is_file() => Self::load(Path::new(CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    /// The validated stage catalog this config selects.
    pub fn catalog(&self) -> ConfigResult<StageCatalog> {
        let catalog = match &self.stages {
            Some(explicit) => explicit.clone(),
            None => StageCatalog::builtin(&self.stage_version).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown stage_version `{}`", self.stage_version))
            })?,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn downstream_for(&self, platform: &str) -> Option<&DownstreamRepo> {
        self.downstream.iter().find(|r| r.provides(platform))
    }

    /// Runner tags for jobs on `host`: the host name plus configured extras.
    pub fn tags_for(&self, host: &str) -> Vec<String> {
        let mut tags = vec![host.to_string()];
        if let Some(extra) = self.runner_tags.get(host) {
            tags.extend(extra.iter().cloned());
        }
        tags
    }
}
