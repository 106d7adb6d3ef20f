//! Platform value objects and their marker-file classification.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::directive::Directive;

/// Marker file that makes an hdl directory buildable.
pub const HDL_MARKER: &str = "Makefile";

/// Build target family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    Hdl,
    Rcc,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Hdl => "hdl",
            Model::Rcc => "rcc",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a platform can run the orchestration itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Cross,
}

/// Tagged platform classification over `{Host, Cross} x {Hdl, Rcc}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PlatformKind {
    Hdl { role: Role, simulator: bool },
    Rcc { role: Role },
}

/// A discovered build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
    /// Project the platform was discovered in.
    pub project: String,
    pub kind: PlatformKind,
    /// Names of platforms the directive links to this one.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub linked: BTreeSet<String>,
}

impl Platform {
    pub fn new(name: impl Into<String>, project: impl Into<String>, kind: PlatformKind) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            kind,
            linked: BTreeSet::new(),
        }
    }

    pub fn model(&self) -> Model {
        match self.kind {
            PlatformKind::Hdl { .. } => Model::Hdl,
            PlatformKind::Rcc { .. } => Model::Rcc,
        }
    }

    pub fn role(&self) -> Role {
        match self.kind {
            PlatformKind::Hdl { role, .. } | PlatformKind::Rcc { role } => role,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    pub fn is_simulator(&self) -> bool {
        matches!(self.kind, PlatformKind::Hdl { simulator: true, .. })
    }

    /// Whether tests for this platform run on the machine doing the build.
    pub fn tests_locally(&self) -> bool {
        self.is_host() || self.is_simulator()
    }

    /// Return a copy whose links are the directive's links restricted to `known`.
    pub fn with_links(&self, directive: &Directive, known: &BTreeSet<String>) -> Self {
        let linked = directive
            .links(&self.name)
            .map(|links| links.intersection(known).cloned().collect())
            .unwrap_or_default();
        Self {
            linked,
            ..self.clone()
        }
    }
}

/// Classify `hdl/platforms/<name>`: a platform iff it carries a `Makefile`.
pub(crate) fn classify_hdl(dir: &Path, name: &str, project: &str) -> Option<Platform> {
    if !dir.join(HDL_MARKER).is_file() {
        return None;
    }
    let role = host_role(dir, name);
    let simulator = dir.join(format!("runSimExec.{name}")).is_file();
    Some(Platform::new(
        name,
        project,
        PlatformKind::Hdl { role, simulator },
    ))
}

/// Classify `rcc/platforms/<name>`: a platform iff it carries `<name>.mk`.
pub(crate) fn classify_rcc(dir: &Path, name: &str, project: &str) -> Option<Platform> {
    if !dir.join(format!("{name}.mk")).is_file() {
        return None;
    }
    Some(Platform::new(
        name,
        project,
        PlatformKind::Rcc {
            role: host_role(dir, name),
        },
    ))
}

fn host_role(dir: &Path, name: &str) -> Role {
    if dir.join(format!("{name}-check.sh")).is_file() {
        Role::Host
    } else {
        Role::Cross
    }
}
