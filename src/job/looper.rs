// src/job/looper.rs

//! Repeat a job template with textual substitutions.
//!
//! Each iteration serializes the template to JSON, replaces every rule key
//! by its value (`${i}` inside a value becomes the iteration index), builds
//! the result and runs it. The exit code of every iteration (or a plain
//! "completed" marker when the job exposes none) is exposed on the looper
//! as `iter-<i>`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::errors::{JobError, Result};
use crate::job::definition::{JobDefinition, JobFactory};
use crate::job::output::{OutputValue, keys};
use crate::job::{Job, RunContext};
use crate::types::keys as params;

pub struct Looper {
    template: JobDefinition,
    iterations: u32,
    rules: BTreeMap<String, String>,
    factory: JobFactory,
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("template", &self.template.type_name())
            .field("iterations", &self.iterations)
            .field("rules", &self.rules)
            .finish()
    }
}

impl Looper {
    pub const DEFAULT_ITERATIONS: u32 = 10;
    pub const ITERATION_PLACEHOLDER: &'static str = "${i}";

    pub fn new(
        template: JobDefinition,
        iterations: u32,
        rules: BTreeMap<String, String>,
        factory: JobFactory,
    ) -> Self {
        Self {
            template,
            iterations,
            rules,
            factory,
        }
    }

    pub fn template(&self) -> &JobDefinition {
        &self.template
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn rules(&self) -> &BTreeMap<String, String> {
        &self.rules
    }

    /// Build the job of iteration `iteration`.
    pub fn instantiate(&self, iteration: u32) -> Result<Arc<Job>> {
        let mut text = serde_json::to_string(&self.template)?;
        let index = iteration.to_string();
        for (from, to) in &self.rules {
            text = text.replace(from, &to.replace(Self::ITERATION_PLACEHOLDER, &index));
        }
        let definition: JobDefinition = serde_json::from_str(&text)?;
        let job = self.factory.build(&definition)?;
        job.set_param(params::JOBLOOPITERATION, index);
        Ok(job)
    }

    pub(crate) async fn run(&self, looper: &Arc<Job>, ctx: &RunContext) -> std::result::Result<(), JobError> {
        for iteration in 0..self.iterations {
            let job = self
                .instantiate(iteration)
                .map_err(|e| JobError::config(looper.id(), e))?;
            job.set_id_recursive(looper.id().child(iteration + 1));

            info!(looper = %looper.id(), iteration, job = %job.id(), "running looped job");
            Arc::clone(&job).run(ctx.clone()).await;

            if let Some(error) = job.exception() {
                return Err(JobError::SubJob {
                    master: looper.id().to_string(),
                    job: job.id().to_string(),
                    cause: error.to_string(),
                });
            }

            let result = job
                .output(keys::EXITCODE)
                .unwrap_or_else(|| OutputValue::Text("completed".to_string()));
            looper.expose(format!("iter-{iteration}"), result);
        }
        Ok(())
    }
}
