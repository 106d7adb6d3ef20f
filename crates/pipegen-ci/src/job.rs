//! Jobs and their trigger variants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Colon-join the non-empty name parts.
///
/// Parts are `(stage, [project], [library], host, platform, [linked])`.
pub fn job_name<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .filter(|p| !p.as_ref().is_empty())
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

/// How a parent waits on the pipeline it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Parent job mirrors the child's status.
    Depend,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Depend => "depend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Run a descriptor generated by an earlier job of this pipeline.
    Child {
        artifact: String,
        job: String,
        strategy: Option<Strategy>,
    },
    /// Run a pipeline of another repository.
    Downstream {
        project: String,
        branch: String,
        strategy: Option<Strategy>,
    },
}

impl Trigger {
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Trigger::Child { strategy, .. } | Trigger::Downstream { strategy, .. } => *strategy,
        }
    }
}

/// Files the CI provider keeps from a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub stage: String,
    pub script: Vec<String>,
    pub after_script: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub artifacts: Option<Artifacts>,
    pub tags: Vec<String>,
    pub trigger: Option<Trigger>,
}

impl Job {
    pub fn script(name: impl Into<String>, stage: impl Into<String>, script: Vec<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            script,
            after_script: Vec::new(),
            variables: BTreeMap::new(),
            artifacts: None,
            tags: Vec::new(),
            trigger: None,
        }
    }

    /// A job with no script that launches another pipeline.
    pub fn trigger(name: impl Into<String>, stage: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::script(name, stage, Vec::new())
        }
    }

    pub fn with_after_script(mut self, after_script: Vec<String>) -> Self {
        self.after_script = after_script;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_artifacts<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts = Some(Artifacts {
            paths: paths.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_trigger(&self) -> bool {
        self.trigger.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name_skips_empty_parts() {
        assert_eq!(
            job_name(["build-primitives-core", "core", "primitives", "centos7", "zed"]),
            "build-primitives-core:core:primitives:centos7:zed"
        );
        assert_eq!(job_name(["build", "", "", "centos7", ""]), "build:centos7");
    }

    #[test]
    fn test_trigger_job_has_no_script() {
        let job = Job::trigger(
            "trigger-children:centos7:zed",
            "trigger-children",
            Trigger::Child {
                artifact: ".pipegen/centos7-zed.yml".to_string(),
                job: "generate-children:centos7:zed".to_string(),
                strategy: Some(Strategy::Depend),
            },
        );
        assert!(job.is_trigger());
        assert!(job.script.is_empty());
        assert_eq!(job.trigger.unwrap().strategy(), Some(Strategy::Depend));
    }
}
