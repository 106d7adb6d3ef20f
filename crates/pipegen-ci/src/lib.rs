//! Pipegen CI
//!
//! Turns a discovered [`pipegen_core::Inventory`] plus a run's
//! [`pipegen_core::PipelineContext`] into CI descriptors:
//! - [`stage`]: versioned stage lists per pipeline kind
//! - [`builder`]: the top-level and per-platform child job graphs
//! - [`script`]: build/test commands wrapped in the artifact staging protocol
//! - [`serializer`]: YAML output in the CI provider's layout

pub mod builder;
pub mod config;
pub mod downstream;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod script;
pub mod serializer;
pub mod stage;

pub use builder::{select, GraphBuilder, Selection, Target};
pub use config::{GeneratorConfig, CONFIG_FILE};
pub use downstream::{resolve_branches, DownstreamRepo, FALLBACK_BRANCH};
pub use error::{
    ConfigError, ConfigResult, GraphError, GraphResult, SerializeError, SerializeResult,
};
pub use job::{job_name, Artifacts, Job, Strategy, Trigger};
pub use pipeline::Pipeline;
pub use script::{ScriptRenderer, StagedScript};
pub use serializer::{to_value, to_yaml};
pub use stage::{PipelineKind, StageCatalog, StageDef, StageRole};
