// src/job/definition.rs

//! Serializable job descriptions and the factory that builds live trees.
//!
//! A [`JobDefinition`] is a tagged union keyed by `jobType`:
//!
//! ```json
//! {
//!   "jobType": "Job",
//!   "params": { "NUMTHREADS": "2" },
//!   "steps": [
//!     { "jobType": "ShellJob", "params": { "COMMAND": "echo hello" } },
//!     { "jobType": "EvaluationJob", "focus": "-1.0",
//!       "perceiver": [ { "output": "STDOUT", "pattern": "error",
//!                        "situation": { "name": "failed" } } ] }
//!   ]
//! }
//! ```
//!
//! Evaluation jobs name their focus with a relative path (see
//! [`Job::navigate`]) and their perceiver either by registry name or with
//! inline match rules. [`JobFactory::build`] wires parents, ids and focus
//! links; [`Job::to_definition`] goes the other way.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::job::evaluation::{Evaluation, PerceiverSpec, SituationPerceiver};
use crate::job::looper::Looper;
use crate::job::task::JobTask;
use crate::job::{Job, JobKind};
use crate::types::Parameters;

fn default_iterations() -> u32 {
    Looper::DEFAULT_ITERATIONS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType")]
pub enum JobDefinition {
    Job {
        #[serde(default, skip_serializing_if = "Parameters::is_empty")]
        params: Parameters,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        steps: Vec<JobDefinition>,
    },
    ShellJob {
        #[serde(default, skip_serializing_if = "Parameters::is_empty")]
        params: Parameters,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        steps: Vec<JobDefinition>,
    },
    TaskJob {
        task: String,
        #[serde(default, skip_serializing_if = "Parameters::is_empty")]
        params: Parameters,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        steps: Vec<JobDefinition>,
    },
    EvaluationJob {
        focus: String,
        perceiver: PerceiverSpec,
        #[serde(default, skip_serializing_if = "Parameters::is_empty")]
        params: Parameters,
    },
    MonitoringJob {
        focus: String,
        perceiver: PerceiverSpec,
        #[serde(default, skip_serializing_if = "Parameters::is_empty")]
        params: Parameters,
    },
    JobLooper {
        template: Box<JobDefinition>,
        #[serde(default = "default_iterations")]
        iterations: u32,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        rules: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Parameters::is_empty")]
        params: Parameters,
    },
}

impl JobDefinition {
    pub fn params(&self) -> &Parameters {
        match self {
            JobDefinition::Job { params, .. }
            | JobDefinition::ShellJob { params, .. }
            | JobDefinition::TaskJob { params, .. }
            | JobDefinition::EvaluationJob { params, .. }
            | JobDefinition::MonitoringJob { params, .. }
            | JobDefinition::JobLooper { params, .. } => params,
        }
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        match self {
            JobDefinition::Job { params, .. }
            | JobDefinition::ShellJob { params, .. }
            | JobDefinition::TaskJob { params, .. }
            | JobDefinition::EvaluationJob { params, .. }
            | JobDefinition::MonitoringJob { params, .. }
            | JobDefinition::JobLooper { params, .. } => params,
        }
    }

    pub fn steps(&self) -> &[JobDefinition] {
        match self {
            JobDefinition::Job { steps, .. }
            | JobDefinition::ShellJob { steps, .. }
            | JobDefinition::TaskJob { steps, .. } => steps,
            _ => &[],
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JobDefinition::Job { .. } => "Job",
            JobDefinition::ShellJob { .. } => "ShellJob",
            JobDefinition::TaskJob { .. } => "TaskJob",
            JobDefinition::EvaluationJob { .. } => "EvaluationJob",
            JobDefinition::MonitoringJob { .. } => "MonitoringJob",
            JobDefinition::JobLooper { .. } => "JobLooper",
        }
    }
}

/// Builds live job trees from definitions.
///
/// Task jobs and named perceivers are looked up in the factory's
/// registries; [`MatchOutput`](crate::job::MatchOutput) rules need no
/// registration.
#[derive(Clone, Default)]
pub struct JobFactory {
    tasks: HashMap<String, Arc<dyn JobTask>>,
    perceivers: HashMap<String, Arc<dyn SituationPerceiver>>,
}

impl fmt::Debug for JobFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tasks: Vec<_> = self.tasks.keys().collect();
        tasks.sort();
        let mut perceivers: Vec<_> = self.perceivers.keys().collect();
        perceivers.sort();
        f.debug_struct("JobFactory")
            .field("tasks", &tasks)
            .field("perceivers", &perceivers)
            .finish()
    }
}

impl JobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, name: impl Into<String>, task: Arc<dyn JobTask>) -> Self {
        self.tasks.insert(name.into(), task);
        self
    }

    /// Register a perceiver under its own [`SituationPerceiver::name`].
    pub fn with_perceiver(mut self, perceiver: Arc<dyn SituationPerceiver>) -> Self {
        self.perceivers
            .insert(perceiver.name().to_string(), perceiver);
        self
    }

    pub fn has_perceiver(&self, name: &str) -> bool {
        self.perceivers.contains_key(name)
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Build a tree rooted at `#0` and resolve every focus path.
    pub fn build(&self, definition: &JobDefinition) -> Result<Arc<Job>> {
        let root = self.build_node(definition)?;
        resolve_focus(&root, &root)?;
        Ok(root)
    }

    pub fn from_json(&self, text: &str) -> Result<Arc<Job>> {
        let definition: JobDefinition = serde_json::from_str(text)?;
        self.build(&definition)
    }

    fn build_node(&self, definition: &JobDefinition) -> Result<Arc<Job>> {
        let params = definition.params().clone();
        let job = match definition {
            JobDefinition::Job { .. } => Job::plain(params),
            JobDefinition::ShellJob { .. } => Job::shell(params),
            JobDefinition::TaskJob { task, .. } => {
                let unit = self.tasks.get(task).ok_or_else(|| {
                    EngineError::UnknownJobType(format!("task '{task}' is not registered"))
                })?;
                Job::task(task.clone(), Arc::clone(unit), params)
            }
            JobDefinition::EvaluationJob {
                focus, perceiver, ..
            } => Job::evaluation(self.evaluation(perceiver)?.with_focus_path(focus), params),
            JobDefinition::MonitoringJob {
                focus, perceiver, ..
            } => Job::monitoring(self.evaluation(perceiver)?.with_focus_path(focus), params),
            JobDefinition::JobLooper {
                template,
                iterations,
                rules,
                ..
            } => Job::new(
                JobKind::Looper(Looper::new(
                    (**template).clone(),
                    *iterations,
                    rules.clone(),
                    self.clone(),
                )),
                params,
            ),
        };

        for step in definition.steps() {
            job.add_step(self.build_node(step)?);
        }
        Ok(job)
    }

    fn evaluation(&self, spec: &PerceiverSpec) -> Result<Evaluation> {
        match spec {
            PerceiverSpec::Named(name) => {
                let perceiver = self.perceivers.get(name).ok_or_else(|| {
                    EngineError::ConfigError(format!("unknown perceiver '{name}'"))
                })?;
                Ok(Evaluation::new(Arc::clone(perceiver)))
            }
            PerceiverSpec::Rules(rules) => Evaluation::from_rules(rules.clone()),
        }
    }
}

fn resolve_focus(root: &Arc<Job>, job: &Arc<Job>) -> Result<()> {
    if let Some(evaluation) = job.evaluation_part() {
        if let Some(path) = evaluation.focus_path() {
            let focus = job.navigate(root, path)?.ok_or_else(|| {
                EngineError::ConfigError(format!(
                    "focus path '{path}' of job {} does not lead to a job",
                    job.id()
                ))
            })?;
            evaluation.set_focus(&focus);
        }
    }
    for step in job.steps() {
        resolve_focus(root, &step)?;
    }
    Ok(())
}

impl Job {
    /// Describe this subtree so that a [`JobFactory`] can rebuild it.
    ///
    /// Evaluation jobs built without a focus path cannot be described.
    pub fn to_definition(&self) -> Result<JobDefinition> {
        let params = self.params();
        let steps = self
            .steps()
            .iter()
            .map(|step| step.to_definition())
            .collect::<Result<Vec<_>>>()?;

        let focus_of = |evaluation: &Evaluation| {
            evaluation
                .focus_path()
                .map(str::to_string)
                .ok_or_else(|| {
                    EngineError::ConfigError(format!(
                        "evaluation job {} has no focus path and cannot be serialized",
                        self.id()
                    ))
                })
        };

        Ok(match self.kind() {
            JobKind::Plain => JobDefinition::Job { params, steps },
            JobKind::Shell => JobDefinition::ShellJob { params, steps },
            JobKind::Task { name, .. } => JobDefinition::TaskJob {
                task: name.clone(),
                params,
                steps,
            },
            JobKind::Evaluation(evaluation) => JobDefinition::EvaluationJob {
                focus: focus_of(evaluation)?,
                perceiver: evaluation.perceiver_spec().clone(),
                params,
            },
            JobKind::Monitoring(evaluation) => JobDefinition::MonitoringJob {
                focus: focus_of(evaluation)?,
                perceiver: evaluation.perceiver_spec().clone(),
                params,
            },
            JobKind::Looper(looper) => JobDefinition::JobLooper {
                template: Box::new(looper.template().clone()),
                iterations: looper.iterations(),
                rules: looper.rules().clone(),
                params,
            },
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_definition()?)?)
    }
}
