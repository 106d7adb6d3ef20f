//! Downstream repositories that build platforms this tree does not carry.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pipegen_core::{Command, CommandExecutor};

/// Branch triggered when a downstream has no branch matching ours.
pub const FALLBACK_BRANCH: &str = "develop";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamRepo {
    /// CI project path, e.g. `radio/osp/plutosdr`.
    pub project: String,
    /// Clone URL used to list branches.
    #[serde(default)]
    pub url: Option<String>,
    /// Platforms this repository builds.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Known branches. Filled by [`resolve_branches`] when `url` is set.
    #[serde(default)]
    pub branches: Vec<String>,
}

impl DownstreamRepo {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            url: None,
            platforms: Vec::new(),
            branches: Vec::new(),
        }
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    pub fn provides(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }

    /// `<group>-<branch>` when the downstream has exactly that branch,
    /// otherwise [`FALLBACK_BRANCH`].
    pub fn resolve_branch(&self, group: &str, branch: &str) -> String {
        let wanted = format!("{group}-{branch}");
        if self.branches.iter().any(|b| *b == wanted) {
            wanted
        } else {
            FALLBACK_BRANCH.to_string()
        }
    }
}

/// Fill `branches` of every repository with a `url` from `git ls-remote`.
///
/// A repository that cannot be listed keeps its configured branches and so
/// falls back to [`FALLBACK_BRANCH`] unless one of them matches.
pub async fn resolve_branches(repos: &mut [DownstreamRepo], executor: &dyn CommandExecutor) {
    for repo in repos.iter_mut() {
        let Some(url) = repo.url.as_deref() else {
            continue;
        };
        let cmd = Command::new(["git", "ls-remote", "--heads", url]);
        match executor.run_checked(&cmd).await {
            Ok(out) => {
                repo.branches = parse_heads(&out.stdout);
                debug!(
                    project = %repo.project,
                    branches = repo.branches.len(),
                    "listed downstream branches"
                );
            }
            Err(e) => warn!(project = %repo.project, error = %e, "cannot list downstream branches"),
        }
    }
}

/// Branch names from `git ls-remote --heads` output.
pub fn parse_heads(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|r| r.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipegen_core::fakes::RecordingExecutor;
    use pipegen_core::CommandOutput;

    #[test]
    fn test_resolve_branch() {
        let repo = DownstreamRepo::new("osp/plutosdr").with_branches(["develop", "ocpi-feature-x"]);
        assert_eq!(repo.resolve_branch("ocpi", "feature-x"), "ocpi-feature-x");
        assert_eq!(repo.resolve_branch("ocpi", "feature-y"), "develop");
        assert_eq!(repo.resolve_branch("other", "feature-x"), "develop");
    }

    #[test]
    fn test_parse_heads() {
        let out = "1a2b\trefs/heads/develop\n3c4d\trefs/heads/ocpi-feature-x\n";
        assert_eq!(parse_heads(out), ["develop", "ocpi-feature-x"]);
        assert!(parse_heads("").is_empty());
    }

    #[tokio::test]
    async fn test_resolve_branches_uses_ls_remote() {
        let exec = RecordingExecutor::new();
        exec.on(
            ["git", "ls-remote"],
            CommandOutput::success("aa\trefs/heads/ocpi-main\n"),
        );
        let mut repos = vec![
            DownstreamRepo {
                url: Some("https://example.com/plutosdr.git".to_string()),
                ..DownstreamRepo::new("osp/plutosdr")
            },
            DownstreamRepo::new("osp/offline").with_branches(["develop"]),
        ];

        resolve_branches(&mut repos, &exec).await;

        assert_eq!(repos[0].branches, ["ocpi-main"]);
        assert_eq!(repos[1].branches, ["develop"]);
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_branches_failure_keeps_fallback() {
        let exec = RecordingExecutor::new();
        exec.on(["git"], CommandOutput::failure(128, "fatal: repository not found"));
        let mut repos = vec![DownstreamRepo {
            url: Some("https://example.com/gone.git".to_string()),
            ..DownstreamRepo::new("osp/gone")
        }];
        resolve_branches(&mut repos, &exec).await;
        assert_eq!(repos[0].resolve_branch("ocpi", "main"), FALLBACK_BRANCH);
    }
}
