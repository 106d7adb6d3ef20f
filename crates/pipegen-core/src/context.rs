//! The immutable per-invocation pipeline context.
//!
//! Built once at startup from the CI provider's environment and passed
//! explicitly to every component. Required variables are checked up front.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::directive::{extract_commit_tag, ColonlessGroup, Directive};
use crate::error::ContextError;

pub const VAR_PIPELINE_ID: &str = "CI_PIPELINE_ID";
pub const VAR_PIPELINE_SOURCE: &str = "CI_PIPELINE_SOURCE";
pub const VAR_COMMIT_REF_NAME: &str = "CI_COMMIT_REF_NAME";
pub const VAR_MR_SOURCE_BRANCH: &str = "CI_MERGE_REQUEST_SOURCE_BRANCH_NAME";
pub const VAR_PROJECT_NAMESPACE: &str = "CI_PROJECT_NAMESPACE";
pub const VAR_COMMIT_MESSAGE: &str = "CI_COMMIT_MESSAGE";
pub const VAR_PLATFORMS: &str = "platforms";
pub const VAR_MR_PLATFORMS: &str = "mr_platforms";
pub const VAR_UPSTREAM_PIPELINE_ID: &str = "PIPEGEN_UPSTREAM_PIPELINE_ID";
pub const VAR_DEFAULT_HOSTS: &str = "PIPEGEN_DEFAULT_HOSTS";

/// What caused the CI provider to start this pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    Push,
    Web,
    Schedule,
    Api,
    Trigger,
    MergeRequestEvent,
    /// Child pipeline started by a trigger job of a parent in this repository.
    ParentPipeline,
    /// Multi-project pipeline started by another repository.
    Pipeline,
}

impl PipelineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineSource::Push => "push",
            PipelineSource::Web => "web",
            PipelineSource::Schedule => "schedule",
            PipelineSource::Api => "api",
            PipelineSource::Trigger => "trigger",
            PipelineSource::MergeRequestEvent => "merge_request_event",
            PipelineSource::ParentPipeline => "parent_pipeline",
            PipelineSource::Pipeline => "pipeline",
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, PipelineSource::ParentPipeline)
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, PipelineSource::Schedule)
    }
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineSource {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(PipelineSource::Push),
            "web" => Ok(PipelineSource::Web),
            "schedule" => Ok(PipelineSource::Schedule),
            "api" => Ok(PipelineSource::Api),
            "trigger" => Ok(PipelineSource::Trigger),
            "merge_request_event" => Ok(PipelineSource::MergeRequestEvent),
            "parent_pipeline" => Ok(PipelineSource::ParentPipeline),
            "pipeline" => Ok(PipelineSource::Pipeline),
            other => Err(ContextError::UnknownSource(other.to_string())),
        }
    }
}

/// Everything a generator run needs to know about the triggering pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub pipeline_id: String,
    /// Pipeline id of the parent when this pipeline is a generated child.
    pub upstream_pipeline_id: Option<String>,
    pub source: PipelineSource,
    /// Source branch for merge requests, otherwise the commit ref.
    pub branch: String,
    /// Last segment of the project namespace.
    pub group: String,
    pub commit_message: Option<String>,
    pub platforms: Option<String>,
    pub mr_platforms: Option<String>,
    pub default_hosts: Vec<String>,
}

impl PipelineContext {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ContextError::Missing(key));

        let source: PipelineSource = require(VAR_PIPELINE_SOURCE)?.parse()?;
        let branch = match source {
            PipelineSource::MergeRequestEvent => require(VAR_MR_SOURCE_BRANCH)?,
            _ => require(VAR_COMMIT_REF_NAME)?,
        };
        let namespace = require(VAR_PROJECT_NAMESPACE)?;
        let group = namespace
            .rsplit('/')
            .next()
            .unwrap_or(namespace.as_str())
            .to_string();

        let default_hosts = get(VAR_DEFAULT_HOSTS)
            .map(|hosts| {
                hosts
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            pipeline_id: require(VAR_PIPELINE_ID)?,
            upstream_pipeline_id: get(VAR_UPSTREAM_PIPELINE_ID),
            source,
            branch,
            group,
            commit_message: get(VAR_COMMIT_MESSAGE),
            platforms: get(VAR_PLATFORMS),
            mr_platforms: get(VAR_MR_PLATFORMS),
            default_hosts,
        })
    }

    /// Select the single directive text this pipeline source consults.
    ///
    /// Returns the name of the variable it came from alongside the text.
    pub fn directive_text(&self) -> Result<(&'static str, &str), ContextError> {
        match self.source {
            PipelineSource::MergeRequestEvent => self
                .mr_platforms
                .as_deref()
                .map(|text| (VAR_MR_PLATFORMS, text))
                .ok_or(ContextError::Missing(VAR_MR_PLATFORMS)),
            PipelineSource::Push => {
                if let Some(tag) = self.commit_message.as_deref().and_then(extract_commit_tag) {
                    return Ok((VAR_COMMIT_MESSAGE, tag));
                }
                self.platforms_text()
            }
            _ => self.platforms_text(),
        }
    }

    /// Parse the directive selected by [`Self::directive_text`].
    pub fn directive(&self, colonless: ColonlessGroup) -> Result<Directive, ContextError> {
        let (source_var, text) = self.directive_text()?;
        Directive::parse_with(text, colonless)
            .map_err(|error| ContextError::Directive { source_var, error })
    }

    fn platforms_text(&self) -> Result<(&'static str, &str), ContextError> {
        self.platforms
            .as_deref()
            .map(|text| (VAR_PLATFORMS, text))
            .ok_or(ContextError::Missing(VAR_PLATFORMS))
    }
}
