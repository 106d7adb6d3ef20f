//! Error types for pipegen-ci

use std::path::PathBuf;

use pipegen_core::ContextError;
use thiserror::Error;

/// Graph construction failures. All of them abort generation.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Job placed in a stage its pipeline does not declare
    #[error("job `{job}` uses stage `{stage}` which is not in the {pipeline} stage list")]
    UnknownStage {
        job: String,
        stage: String,
        pipeline: String,
    },

    /// Two jobs resolved to the same name
    #[error("duplicate job name: {0}")]
    DuplicateJobName(String),

    /// Active catalog declares no stage for a role the builder fills
    #[error("the {pipeline} stage list has no stage for {role} jobs")]
    MissingStage { role: String, pipeline: String },

    /// Library kind with no stage in the active catalog
    #[error("no {pipeline} stage builds library `{project}/{library}` of kind `{kind}`")]
    UnknownLibraryKind {
        project: String,
        library: String,
        kind: String,
        pipeline: String,
    },

    /// Requested platform was not discovered or has the wrong role
    #[error("unknown platform `{name}`: {reason}")]
    UnknownPlatform { name: String, reason: String },

    /// Directive and defaults left no host to build on
    #[error("no host platform selected (directive names none and no default host was discovered)")]
    NoHosts,

    /// Trigger references a job that is not in an earlier stage
    #[error("trigger `{job}` references `{target}` which is not a job in an earlier stage")]
    DanglingTrigger { job: String, target: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Descriptor rendering failures.
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("duplicate job name in descriptor: {0}")]
    DuplicateJobName(String),

    /// Job name collides with a top-level descriptor keyword
    #[error("job name `{0}` is a reserved descriptor key")]
    ReservedJobName(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Generator configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
pub type SerializeResult<T> = std::result::Result<T, SerializeError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
