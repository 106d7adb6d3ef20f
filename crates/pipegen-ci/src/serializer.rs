//! Render a [`Pipeline`] as the CI provider's YAML descriptor.
//!
//! ```yaml
//! stages: [prereqs, build, ...]
//! variables: {...}          # only when set
//! build:centos7:
//!   stage: build
//!   script: [...]
//!   after_script: [...]
//!   tags: [centos7]
//! trigger-children:centos7:zed:
//!   stage: trigger-children
//!   trigger:
//!     include: [{artifact: .pipegen/centos7-zed.yml, job: generate-children:centos7:zed}]
//!     strategy: depend
//! ```
//!
//! Keys are written in insertion order: stages, variables, then jobs in
//! pipeline order.

use serde_yaml::{Mapping, Value};

use crate::error::{SerializeError, SerializeResult};
use crate::job::{Job, Trigger};
use crate::pipeline::Pipeline;

/// Top-level keys a job name must not shadow.
pub const RESERVED_KEYS: &[&str] = &[
    "stages",
    "variables",
    "default",
    "include",
    "workflow",
    "image",
    "services",
    "cache",
    "before_script",
    "after_script",
];

fn string(s: impl Into<String>) -> Value {
    Value::String(s.into())
}

fn strings<'a>(items: impl IntoIterator<Item = &'a String>) -> Value {
    Value::Sequence(items.into_iter().map(|s| string(s.as_str())).collect())
}

fn insert(map: &mut Mapping, key: &str, value: Value) {
    map.insert(string(key), value);
}

fn trigger_value(trigger: &Trigger) -> Value {
    let mut map = Mapping::new();
    let strategy = match trigger {
        Trigger::Child {
            artifact,
            job,
            strategy,
        } => {
            let mut include = Mapping::new();
            insert(&mut include, "artifact", string(artifact.as_str()));
            insert(&mut include, "job", string(job.as_str()));
            insert(&mut map, "include", Value::Sequence(vec![Value::Mapping(include)]));
            strategy
        }
        Trigger::Downstream {
            project,
            branch,
            strategy,
        } => {
            insert(&mut map, "project", string(project.as_str()));
            insert(&mut map, "branch", string(branch.as_str()));
            strategy
        }
    };
    if let Some(strategy) = strategy {
        insert(&mut map, "strategy", string(strategy.as_str()));
    }
    Value::Mapping(map)
}

fn variables_value<'a>(vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Value {
    let mut map = Mapping::new();
    for (k, v) in vars {
        insert(&mut map, k, string(v.as_str()));
    }
    Value::Mapping(map)
}

/// One job's mapping. Empty lists are omitted.
pub fn job_value(job: &Job) -> Value {
    let mut map = Mapping::new();
    insert(&mut map, "stage", string(job.stage.as_str()));
    if !job.variables.is_empty() {
        insert(&mut map, "variables", variables_value(&job.variables));
    }
    if let Some(trigger) = &job.trigger {
        insert(&mut map, "trigger", trigger_value(trigger));
    } else {
        insert(&mut map, "script", strings(&job.script));
    }
    if !job.after_script.is_empty() {
        insert(&mut map, "after_script", strings(&job.after_script));
    }
    if let Some(artifacts) = &job.artifacts {
        let mut a = Mapping::new();
        insert(&mut a, "paths", strings(&artifacts.paths));
        insert(&mut map, "artifacts", Value::Mapping(a));
    }
    if !job.tags.is_empty() {
        insert(&mut map, "tags", strings(&job.tags));
    }
    Value::Mapping(map)
}

/// The whole descriptor as a YAML value.
pub fn to_value(pipeline: &Pipeline) -> SerializeResult<Value> {
    let mut root = Mapping::new();
    insert(&mut root, "stages", strings(pipeline.stages()));
    if !pipeline.variables().is_empty() {
        insert(&mut root, "variables", variables_value(pipeline.variables()));
    }

    for job in pipeline.jobs() {
        if RESERVED_KEYS.contains(&job.name.as_str()) {
            return Err(SerializeError::ReservedJobName(job.name.clone()));
        }
        let key = string(job.name.as_str());
        if root.contains_key(&key) {
            return Err(SerializeError::DuplicateJobName(job.name.clone()));
        }
        root.insert(key, job_value(job));
    }
    Ok(Value::Mapping(root))
}

pub fn to_yaml(pipeline: &Pipeline) -> SerializeResult<String> {
    Ok(serde_yaml::to_string(&to_value(pipeline)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Strategy;
    use crate::stage::{PipelineKind, StageCatalog};

    fn host_pipeline() -> Pipeline {
        Pipeline::new(PipelineKind::Host, StageCatalog::v2().names(PipelineKind::Host))
    }

    #[test]
    fn test_descriptor_shape() {
        let mut p = host_pipeline();
        p.add_job(
            Job::script("build:centos7", "build", vec!["make build".into()])
                .with_after_script(vec!["echo done".into()])
                .with_tags(["centos7"]),
        )
        .unwrap();
        p.add_job(
            Job::script("generate-children:centos7:zed", "generate-children", vec!["gen".into()])
                .with_artifacts([".pipegen/centos7-zed.yml"]),
        )
        .unwrap();
        p.add_job(Job::trigger(
            "trigger-children:centos7:zed",
            "trigger-children",
            Trigger::Child {
                artifact: ".pipegen/centos7-zed.yml".into(),
                job: "generate-children:centos7:zed".into(),
                strategy: Some(Strategy::Depend),
            },
        ))
        .unwrap();

        let value = to_value(&p).unwrap();
        let keys: Vec<&str> = value
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap())
            .collect();
        assert_eq!(
            keys,
            [
                "stages",
                "build:centos7",
                "generate-children:centos7:zed",
                "trigger-children:centos7:zed"
            ]
        );

        let trigger = &value["trigger-children:centos7:zed"];
        assert!(trigger.get("script").is_none());
        assert_eq!(trigger["trigger"]["strategy"], "depend");
        assert_eq!(
            trigger["trigger"]["include"][0]["job"],
            "generate-children:centos7:zed"
        );
        assert_eq!(value["build:centos7"]["tags"][0], "centos7");
        assert_eq!(
            value["generate-children:centos7:zed"]["artifacts"]["paths"][0],
            ".pipegen/centos7-zed.yml"
        );
    }

    #[test]
    fn test_downstream_trigger_without_strategy() {
        let mut p = host_pipeline();
        p.add_job(
            Job::trigger(
                "trigger-children:centos7:plutosdr",
                "trigger-children",
                Trigger::Downstream {
                    project: "radio/osp/plutosdr".into(),
                    branch: "develop".into(),
                    strategy: None,
                },
            )
            .with_variable("platforms", "centos7:plutosdr"),
        )
        .unwrap();

        let yaml = to_yaml(&p).unwrap();
        assert!(yaml.contains("project: radio/osp/plutosdr"));
        assert!(yaml.contains("branch: develop"));
        assert!(!yaml.contains("strategy"));
        assert!(yaml.contains("platforms: centos7:plutosdr"));
    }

    #[test]
    fn test_variables_written_before_jobs() {
        let mut p = Pipeline::new(PipelineKind::Rcc, StageCatalog::v2().names(PipelineKind::Rcc));
        p.set_variable("PIPEGEN_UPSTREAM_PIPELINE_ID", "100");
        p.add_job(Job::script("build:centos7:xilinx13_3", "build", vec!["make".into()]))
            .unwrap();
        let yaml = to_yaml(&p).unwrap();
        let vars = yaml.find("variables:").unwrap();
        let job = yaml.find("build:centos7:xilinx13_3:").unwrap();
        assert!(vars < job);
        assert!(yaml.contains("PIPEGEN_UPSTREAM_PIPELINE_ID: '100'"));
    }

    #[test]
    fn test_rejects_reserved_names() {
        let mut catalog = StageCatalog::v2();
        catalog.host[0].name = "variables".into();
        let mut p = Pipeline::new(PipelineKind::Host, catalog.names(PipelineKind::Host));
        p.add_job(Job::script("variables", "variables", vec![])).unwrap();
        assert!(matches!(
            to_value(&p),
            Err(SerializeError::ReservedJobName(_))
        ));
    }
}
