//! Asset discovery: classify a projects tree into projects, libraries and
//! platforms from the presence of marker files.
//!
//! Layout walked, one directory per project under the root:
//!
//! ```text
//! <root>/<project>/Project.mk
//! <root>/<project>/hdl/<kind>/Makefile
//! <root>/<project>/components[/<name>]/specs/
//! <root>/<project>/hdl/platforms/<name>/Makefile
//! <root>/<project>/rcc/platforms/<name>/<name>.mk
//! ```
//!
//! Every listing is sorted by file name, so an unchanged tree always yields
//! the same [`Inventory`].

pub mod platform;
pub mod project;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use platform::{Model, Platform, PlatformKind, Role};
pub use project::{Library, LibraryKind, Project};

use crate::error::{DiscoveryError, DiscoveryResult};
use project::{is_component_library, is_hdl_library, PROJECT_MARKER};

/// Everything discovered under a projects root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub projects: Vec<Project>,
    /// Sorted by platform name; names are unique.
    pub platforms: Vec<Platform>,
}

impl Inventory {
    pub fn platform(&self, name: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.name == name)
    }

    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn platform_names(&self) -> BTreeSet<String> {
        self.platforms.iter().map(|p| p.name.clone()).collect()
    }
}

/// Discover projects, their libraries and their platforms under `root`.
pub fn discover(root: &Path) -> DiscoveryResult<Inventory> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
    }

    let mut projects = Vec::new();
    let mut platforms: Vec<Platform> = Vec::new();

    for (name, dir) in subdirs(root)? {
        if !dir.join(PROJECT_MARKER).is_file() {
            debug!(dir = %dir.display(), "skipping directory without {PROJECT_MARKER}");
            continue;
        }

        for platform in discover_project_platforms(&dir, &name)? {
            if let Some(existing) = platforms.iter().find(|p| p.name == platform.name) {
                warn!(
                    platform = %platform.name,
                    kept = %existing.project,
                    ignored = %platform.project,
                    "platform defined by more than one project"
                );
                continue;
            }
            platforms.push(platform);
        }

        projects.push(Project {
            libraries: discover_libraries(&dir)?,
            name,
        });
    }

    platforms.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(
        projects = projects.len(),
        platforms = platforms.len(),
        "discovery complete"
    );

    Ok(Inventory {
        projects,
        platforms,
    })
}

/// Discover only the platforms under `root`.
pub fn discover_platforms(root: &Path) -> DiscoveryResult<Vec<Platform>> {
    discover(root).map(|inventory| inventory.platforms)
}

fn discover_project_platforms(project_dir: &Path, project: &str) -> DiscoveryResult<Vec<Platform>> {
    let mut found = Vec::new();

    for (name, dir) in subdirs(&project_dir.join("hdl").join("platforms"))? {
        match platform::classify_hdl(&dir, &name, project) {
            Some(p) => found.push(p),
            None => debug!(dir = %dir.display(), "not an hdl platform"),
        }
    }
    for (name, dir) in subdirs(&project_dir.join("rcc").join("platforms"))? {
        match platform::classify_rcc(&dir, &name, project) {
            Some(p) => found.push(p),
            None => debug!(dir = %dir.display(), "not an rcc platform"),
        }
    }

    Ok(found)
}

fn discover_libraries(project_dir: &Path) -> DiscoveryResult<Vec<Library>> {
    let mut libraries = Vec::new();

    for (name, dir) in subdirs(&project_dir.join("hdl"))? {
        match name.parse::<LibraryKind>() {
            Ok(kind) if kind.is_hdl() => {
                if is_hdl_library(&dir) {
                    libraries.push(Library::new(name.clone(), kind, Path::new("hdl").join(&name)));
                } else {
                    debug!(dir = %dir.display(), "hdl library without Makefile");
                }
            }
            _ => debug!(dir = %dir.display(), "unrecognised hdl directory"),
        }
    }

    let components = project_dir.join("components");
    if is_component_library(&components) {
        libraries.push(Library::new("components", LibraryKind::Components, "components"));
    } else {
        for (name, dir) in subdirs(&components)? {
            if is_component_library(&dir) {
                let path = Path::new("components").join(&name);
                libraries.push(Library::new(name, LibraryKind::Components, path));
            } else {
                debug!(dir = %dir.display(), "component directory without specs");
            }
        }
    }

    Ok(libraries)
}

/// Immediate sub-directories of `dir`, sorted by name. Missing `dir` is empty.
fn subdirs(dir: &Path) -> DiscoveryResult<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| DiscoveryError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
            source: e.into(),
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 directory name");
            continue;
        };
        out.push((name, entry.into_path()));
    }
    Ok(out)
}
