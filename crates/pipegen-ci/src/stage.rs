//! Stage lists per pipeline kind.
//!
//! Stage names have drifted between generator releases, so the lists are data:
//! a versioned [`StageCatalog`] whose entries pair a stage name with the
//! [`StageRole`] the builder fills it for.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// The three pipeline shapes the generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Top-level pipeline: builds each host, then fans out per target.
    Host,
    /// Child pipeline for one software target.
    Rcc,
    /// Child pipeline for one hardware target.
    Hdl,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Host => "host",
            PipelineKind::Rcc => "rcc",
            PipelineKind::Hdl => "hdl",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the builder generates into a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageRole {
    Prereqs,
    Build,
    Test,
    GenerateChildren,
    TriggerChildren,
    BuildPrimitivesCore,
    BuildPrimitives,
    BuildLibraries,
    BuildPlatforms,
    BuildAssemblies,
    BuildSdcard,
    BuildTests,
    /// Declared for hand-written jobs; the builder leaves it empty.
    Extra,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Prereqs => "prereqs",
            StageRole::Build => "build",
            StageRole::Test => "test",
            StageRole::GenerateChildren => "generate-children",
            StageRole::TriggerChildren => "trigger-children",
            StageRole::BuildPrimitivesCore => "build-primitives-core",
            StageRole::BuildPrimitives => "build-primitives",
            StageRole::BuildLibraries => "build-libraries",
            StageRole::BuildPlatforms => "build-platforms",
            StageRole::BuildAssemblies => "build-assemblies",
            StageRole::BuildSdcard => "build-sdcard",
            StageRole::BuildTests => "build-tests",
            StageRole::Extra => "extra",
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    pub role: StageRole,
}

impl StageDef {
    pub fn new(name: impl Into<String>, role: StageRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Ordered stage lists for every [`PipelineKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCatalog {
    pub version: String,
    pub host: Vec<StageDef>,
    pub rcc: Vec<StageDef>,
    pub hdl: Vec<StageDef>,
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::v2()
    }
}

fn defs(list: &[(&str, StageRole)]) -> Vec<StageDef> {
    list.iter()
        .map(|(name, role)| StageDef::new(*name, *role))
        .collect()
}

impl StageCatalog {
    pub const DEFAULT_VERSION: &'static str = "v2";

    /// Current stage lists.
    pub fn v2() -> Self {
        use StageRole::*;
        Self {
            version: "v2".to_string(),
            host: Self::host_stages(),
            rcc: defs(&[("prereqs", Prereqs), ("build", Build), ("test", Test)]),
            hdl: defs(&[
                ("build-primitives-core", BuildPrimitivesCore),
                ("build-primitives", BuildPrimitives),
                ("build-libraries", BuildLibraries),
                ("build-platforms", BuildPlatforms),
                ("build-assemblies", BuildAssemblies),
                ("build-sdcard", BuildSdcard),
                ("build-tests", BuildTests),
                ("test", Test),
            ]),
        }
    }

    /// Legacy lists: plural `build-sdcards` and an extra `build-assets-osp`.
    pub fn v1() -> Self {
        use StageRole::*;
        Self {
            version: "v1".to_string(),
            host: Self::host_stages(),
            rcc: defs(&[("prereqs", Prereqs), ("build", Build), ("test", Test)]),
            hdl: defs(&[
                ("build-primitives-core", BuildPrimitivesCore),
                ("build-primitives", BuildPrimitives),
                ("build-libraries", BuildLibraries),
                ("build-platforms", BuildPlatforms),
                ("build-assemblies", BuildAssemblies),
                ("build-assets-osp", Extra),
                ("build-sdcards", BuildSdcard),
                ("build-tests", BuildTests),
                ("test", Test),
            ]),
        }
    }

    fn host_stages() -> Vec<StageDef> {
        use StageRole::*;
        defs(&[
            ("prereqs", Prereqs),
            ("build", Build),
            ("test", Test),
            ("generate-children", GenerateChildren),
            ("trigger-children", TriggerChildren),
        ])
    }

    /// Built-in catalog by version name.
    pub fn builtin(version: &str) -> Option<Self> {
        match version {
            "v1" => Some(Self::v1()),
            "v2" => Some(Self::v2()),
            _ => None,
        }
    }

    pub fn stages(&self, kind: PipelineKind) -> &[StageDef] {
        match kind {
            PipelineKind::Host => &self.host,
            PipelineKind::Rcc => &self.rcc,
            PipelineKind::Hdl => &self.hdl,
        }
    }

    pub fn names(&self, kind: PipelineKind) -> Vec<String> {
        self.stages(kind).iter().map(|s| s.name.clone()).collect()
    }

    /// Name of the first stage of `kind` filled for `role`.
    pub fn stage_for(&self, kind: PipelineKind, role: StageRole) -> Option<&str> {
        self.stages(kind)
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.name.as_str())
    }

    /// `stage` and every stage after it, in order. Empty if `stage` is unknown.
    pub fn from_stage(&self, kind: PipelineKind, stage: &str) -> Vec<String> {
        self.stages(kind)
            .iter()
            .skip_while(|s| s.name != stage)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Reject empty lists and repeated stage names.
    pub fn validate(&self) -> ConfigResult<()> {
        for kind in [PipelineKind::Host, PipelineKind::Rcc, PipelineKind::Hdl] {
            let stages = self.stages(kind);
            if stages.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stage catalog {}: {kind} stage list is empty",
                    self.version
                )));
            }
            let mut seen = HashSet::new();
            for stage in stages {
                if !seen.insert(stage.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "stage catalog {}: {kind} stage `{}` listed twice",
                        self.version, stage.name
                    )));
                }
            }
        }
        Ok(())
    }
}
