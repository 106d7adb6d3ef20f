//! External process invocations as plain values.
//!
//! Every build, transfer or query the generator needs is described by a
//! [`Command`] and run through a [`CommandExecutor`]. Graph construction only
//! ever builds commands; the executor is injected where they actually run.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExecError, ExecResult};

/// An external process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Working directory, inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Exit codes that count as success.
    pub expected_exit_codes: Vec<i32>,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            expected_exit_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn expect_exit_codes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.expected_exit_codes = codes.into();
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn accepts(&self, exit_code: i32) -> bool {
        self.expected_exit_codes.contains(&exit_code)
    }

    /// Render as one POSIX shell line for a job script.
    pub fn to_shell(&self) -> String {
        let line = self
            .argv
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        match &self.cwd {
            Some(dir) => format!("(cd {} && {line})", shell_quote(&dir.to_string_lossy())),
            None => line,
        }
    }
}

/// Quote `arg` for a POSIX shell when it contains anything beyond a safe set.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Runs [`Command`]s.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion and capture output, whatever the exit code.
    async fn run(&self, command: &Command) -> ExecResult<CommandOutput>;

    /// Run and fail unless the exit code is one the command expects.
    async fn run_checked(&self, command: &Command) -> ExecResult<CommandOutput> {
        let output = self.run(command).await?;
        if command.accepts(output.exit_code) {
            Ok(output)
        } else {
            Err(ExecError::UnexpectedExit {
                command: command.argv.join(" "),
                exit_code: output.exit_code,
                expected: command.expected_exit_codes.clone(),
                stderr: output.stderr,
            })
        }
    }
}

/// Executor backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, command: &Command) -> ExecResult<CommandOutput> {
        let start = Instant::now();
        let (exe, args) = command.argv.split_first().ok_or(ExecError::EmptyArgv)?;

        let mut cmd = tokio::process::Command::new(exe);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        debug!(command = %command.argv.join(" "), "spawning");

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: exe.clone(),
            source,
        })?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecError::Timeout {
                    command: command.argv.join(" "),
                    timeout_secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| ExecError::Spawn {
            program: exe.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
