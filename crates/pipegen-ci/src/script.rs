//! Job script rendering.
//!
//! Build steps are [`Command`] values rendered to shell lines; every script
//! job is wrapped in the artifact staging protocol:
//!
//! ```text
//! <generator> artifacts download --include ... --exclude ...
//! touch .pipegen-timestamp
//! <build command>
//! touch .pipegen-success
//! <generator> artifacts upload --stage S --job J --tag successful-job
//! ```
//!
//! with an `after_script` that uploads to the `-failed` key when the success
//! marker is missing.

use std::path::Path;

use pipegen_artifacts::staging::stage_exclude;
use pipegen_artifacts::{BundleTag, SUCCESS_MARKER, TIMESTAMP_MARKER};
use pipegen_core::{shell_quote, Command, Model, Platform};

use crate::config::GeneratorConfig;

pub const VAR_PLATFORM: &str = "Platform";
pub const VAR_HOST_PLATFORM: &str = "HostPlatform";
pub const VAR_HDL_PLATFORM: &str = "HdlPlatform";
pub const VAR_RCC_PLATFORM: &str = "RccPlatform";
/// Set only when tests run on a remote target rather than the build machine.
pub const VAR_REMOTE_TARGET: &str = "RemoteTarget";

/// Script and after-script of one staged job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedScript {
    pub script: Vec<String>,
    pub after_script: Vec<String>,
}

/// Renders commands for one generator configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRenderer<'a> {
    config: &'a GeneratorConfig,
}

impl<'a> ScriptRenderer<'a> {
    pub fn new(config: &'a GeneratorConfig) -> Self {
        Self { config }
    }

    /// The generator itself, carrying the config file when one was loaded.
    pub fn generator(&self) -> Command {
        let cmd = Command::new([self.config.generator.as_str()]);
        match &self.config.source {
            Some(path) => cmd.arg("--config").arg(path.to_string_lossy()),
            None => cmd,
        }
    }

    /// `<build_tool> [-C dir] <goal> K=V...`
    pub fn make(&self, dir: Option<&Path>, goal: &str, vars: &[(&str, &str)]) -> Command {
        let mut cmd = Command::new([self.config.build_tool.as_str()]);
        if let Some(dir) = dir {
            cmd = cmd.arg("-C").arg(dir.to_string_lossy());
        }
        cmd.arg(goal)
            .args(vars.iter().map(|(k, v)| format!("{k}={v}")))
    }

    /// Test `target` from `host`: local when the target tests where it
    /// builds, otherwise against the target as a remote.
    pub fn test(&self, dir: Option<&Path>, target: &Platform, host: &str) -> Command {
        let platform_var = match target.model() {
            Model::Hdl => VAR_HDL_PLATFORM,
            Model::Rcc => VAR_PLATFORM,
        };
        if target.tests_locally() {
            self.make(dir, "test", &[(platform_var, target.name.as_str())])
        } else {
            self.make(
                dir,
                "test",
                &[
                    (platform_var, target.name.as_str()),
                    (VAR_HOST_PLATFORM, host),
                    (VAR_REMOTE_TARGET, target.name.as_str()),
                ],
            )
        }
    }

    /// Write the child descriptor for `host`/`platform` to `output`.
    pub fn generate_child(&self, host: &str, platform: &str, output: &str) -> Command {
        self.generator().args([
            "generate",
            "--child",
            "--host",
            host,
            "--platform",
            platform,
            "--output",
            output,
        ])
    }

    /// Path of the child descriptor a generate job writes.
    pub fn child_descriptor(&self, host: &str, platform: &str) -> String {
        format!("{}/{host}-{platform}.yml", self.config.ci_dir)
    }

    pub fn download(&self, include: &[String], exclude: &[String]) -> Command {
        let mut cmd = self.generator().args(["artifacts", "download"]);
        for pattern in include {
            cmd = cmd.arg("--include").arg(pattern.as_str());
        }
        for pattern in exclude {
            cmd = cmd.arg("--exclude").arg(pattern.as_str());
        }
        cmd
    }

    pub fn upload(&self, stage: &str, job: &str, failed: bool) -> Command {
        let cmd = self
            .generator()
            .args(["artifacts", "upload", "--stage", stage, "--job", job]);
        if failed {
            cmd.args(["--failed", "--tag", BundleTag::FailedJob.as_str()])
        } else {
            cmd.args(["--tag", BundleTag::SuccessfulJob.as_str()])
        }
    }

    /// Wrap `build` in the download/marker/upload protocol.
    ///
    /// `later_stages` are the job's own stage and every stage after it; their
    /// bundles are excluded from the download.
    pub fn staged(
        &self,
        stage: &str,
        job: &str,
        include: &[String],
        later_stages: &[String],
        build: &Command,
    ) -> StagedScript {
        let exclude: Vec<String> = later_stages.iter().map(|s| stage_exclude(s)).collect();
        let upload_failed = self.upload(stage, job, true).to_shell();

        StagedScript {
            script: vec![
                self.download(include, &exclude).to_shell(),
                format!("touch {}", shell_quote(TIMESTAMP_MARKER)),
                build.to_shell(),
                format!("touch {}", shell_quote(SUCCESS_MARKER)),
                self.upload(stage, job, false).to_shell(),
            ],
            after_script: vec![format!(
                "if [ ! -f {} ]; then {upload_failed}; fi",
                shell_quote(SUCCESS_MARKER)
            )],
        }
    }
}

/// `*<platform>.tar.gz` include globs for the given platform names.
pub fn platform_includes<I, S>(platforms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    platforms
        .into_iter()
        .map(|p| format!("*{}.tar.gz", p.as_ref()))
        .collect()
}
