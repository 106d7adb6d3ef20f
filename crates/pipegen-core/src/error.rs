//! Error taxonomy for directive parsing, discovery, context and execution.

use std::path::PathBuf;

/// Malformed directive mini-language input. Always fatal to generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("directive group `{group}` has more than one `:`")]
    TooManyColons { group: String },

    #[error("directive group `{group}` contains an empty platform name")]
    EmptyItem { group: String },
}

/// Errors raised while walking a project tree.
///
/// Directories that simply match no marker pattern are not errors; they are
/// logged and skipped by the discovery walk.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("projects root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("unknown library kind: {0}")]
    UnknownLibraryKind(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors building the [`crate::context::PipelineContext`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("required variable `{0}` is not set")]
    Missing(&'static str),

    #[error("unrecognised pipeline source: {0}")]
    UnknownSource(String),

    #[error("directive from `{source_var}` is invalid: {error}")]
    Directive {
        source_var: &'static str,
        error: DirectiveError,
    },
}

/// Failures running an external [`crate::command::Command`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command has empty argv")]
    EmptyArgv,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout_secs} seconds")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("`{command}` exited with {exit_code}, expected one of {expected:?}: {stderr}")]
    UnexpectedExit {
        command: String,
        exit_code: i32,
        expected: Vec<i32>,
        stderr: String,
    },
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;
pub type ExecResult<T> = std::result::Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_error_names_group() {
        let err = DirectiveError::TooManyColons {
            group: "a:b:c".to_string(),
        };
        assert!(err.to_string().contains("a:b:c"));
    }

    #[test]
    fn test_unexpected_exit_display() {
        let err = ExecError::UnexpectedExit {
            command: "make".to_string(),
            exit_code: 2,
            expected: vec![0],
            stderr: "no rule".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("make"));
        assert!(msg.contains("no rule"));
    }
}
