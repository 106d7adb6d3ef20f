//! Pipegen Core
//!
//! The shared layer every pipegen component builds on:
//! - [`directive`]: the platform directive mini-language
//! - [`discovery`]: project, library and platform discovery from marker files
//! - [`context`]: the immutable per-run [`PipelineContext`]
//! - [`command`]: external processes as values plus an injectable executor

pub mod command;
pub mod context;
pub mod directive;
pub mod discovery;
pub mod error;
pub mod fakes;
pub mod obs;
pub mod telemetry;

pub use command::{shell_quote, Command, CommandExecutor, CommandOutput, ProcessExecutor};
pub use context::{PipelineContext, PipelineSource};
pub use directive::{extract_commit_tag, parse_directive, ColonlessGroup, Directive};
pub use discovery::{
    discover, discover_platforms, Inventory, Library, LibraryKind, Model, Platform, PlatformKind,
    Project, Role,
};
pub use error::{
    ContextError, DirectiveError, DiscoveryError, DiscoveryResult, ExecError, ExecResult,
};
pub use obs::PipelineSpan;
pub use telemetry::init_tracing;

/// Pipegen version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
