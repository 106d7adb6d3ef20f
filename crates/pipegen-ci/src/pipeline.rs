//! An ordered stage list plus the jobs placed into it.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{GraphError, GraphResult};
use crate::job::{Job, Trigger};
use crate::stage::PipelineKind;

#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    kind: PipelineKind,
    stages: Vec<String>,
    variables: BTreeMap<String, String>,
    jobs: Vec<Job>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Pipeline {
    pub fn new(kind: PipelineKind, stages: Vec<String>) -> Self {
        Self {
            kind,
            stages,
            variables: BTreeMap::new(),
            jobs: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.index.get(name).map(|&i| &self.jobs[i])
    }

    pub fn jobs_in_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a Job> + 'a {
        self.jobs.iter().filter(move |j| j.stage == stage)
    }

    fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    /// Add a job, enforcing stage membership and name uniqueness.
    ///
    /// A child trigger must name a job already placed in an earlier stage.
    pub fn add_job(&mut self, job: Job) -> GraphResult<()> {
        let Some(stage_idx) = self.stage_index(&job.stage) else {
            return Err(GraphError::UnknownStage {
                job: job.name,
                stage: job.stage,
                pipeline: self.kind.to_string(),
            });
        };
        if self.index.contains_key(&job.name) {
            return Err(GraphError::DuplicateJobName(job.name));
        }
        if let Some(Trigger::Child { job: target, .. }) = &job.trigger {
            let earlier = self
                .job(target)
                .and_then(|t| self.stage_index(&t.stage))
                .is_some_and(|idx| idx < stage_idx);
            if !earlier {
                return Err(GraphError::DanglingTrigger {
                    job: job.name,
                    target: target.clone(),
                });
            }
        }

        self.index.insert(job.name.clone(), self.jobs.len());
        self.jobs.push(job);
        Ok(())
    }
}
