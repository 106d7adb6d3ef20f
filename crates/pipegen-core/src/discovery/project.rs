//! Projects and the libraries they own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::discovery::platform::HDL_MARKER;
use crate::error::DiscoveryError;

/// Marker file that makes a directory a project.
pub const PROJECT_MARKER: &str = "Project.mk";

/// Sub-directory that makes a components directory a library.
pub const SPECS_DIR: &str = "specs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryKind {
    Primitives,
    Devices,
    Cards,
    Adapters,
    Platforms,
    Assemblies,
    Components,
}

impl LibraryKind {
    pub const HDL: [LibraryKind; 6] = [
        LibraryKind::Primitives,
        LibraryKind::Devices,
        LibraryKind::Cards,
        LibraryKind::Adapters,
        LibraryKind::Platforms,
        LibraryKind::Assemblies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryKind::Primitives => "primitives",
            LibraryKind::Devices => "devices",
            LibraryKind::Cards => "cards",
            LibraryKind::Adapters => "adapters",
            LibraryKind::Platforms => "platforms",
            LibraryKind::Assemblies => "assemblies",
            LibraryKind::Components => "components",
        }
    }

    pub fn is_hdl(&self) -> bool {
        !matches!(self, LibraryKind::Components)
    }

    /// Component libraries carry unit tests.
    pub fn is_testable(&self) -> bool {
        matches!(self, LibraryKind::Components)
    }
}

impl fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LibraryKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primitives" => Ok(LibraryKind::Primitives),
            "devices" => Ok(LibraryKind::Devices),
            "cards" => Ok(LibraryKind::Cards),
            "adapters" => Ok(LibraryKind::Adapters),
            "platforms" => Ok(LibraryKind::Platforms),
            "assemblies" => Ok(LibraryKind::Assemblies),
            "components" => Ok(LibraryKind::Components),
            other => Err(DiscoveryError::UnknownLibraryKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub kind: LibraryKind,
    /// Location relative to the owning project directory.
    pub path: PathBuf,
}

impl Library {
    pub fn new(name: impl Into<String>, kind: LibraryKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
        }
    }

    pub fn is_testable(&self) -> bool {
        self.kind.is_testable()
    }

    /// Name part used in job names, unique within a project.
    ///
    /// `components/<name>` libraries become `components-<name>` so they never
    /// collide with an hdl library of the same name.
    pub fn label(&self) -> String {
        match self.kind {
            LibraryKind::Components if self.path != Path::new("components") => {
                format!("components-{}", self.name)
            }
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub libraries: Vec<Library>,
}

impl Project {
    pub fn library(&self, name: &str) -> Option<&Library> {
        self.libraries.iter().find(|l| l.name == name)
    }
}

/// Whether `dir` is an hdl library.
pub(crate) fn is_hdl_library(dir: &Path) -> bool {
    dir.join(HDL_MARKER).is_file()
}

/// Whether `dir` is a component library.
pub(crate) fn is_component_library(dir: &Path) -> bool {
    dir.join(SPECS_DIR).is_dir()
}
