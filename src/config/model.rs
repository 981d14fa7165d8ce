// src/config/model.rs

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::job::{Job, JobDefinition, JobFactory};
use crate::types::keys;

/// Job file as read from TOML or JSON, before validation.
///
/// ```toml
/// [config]
/// walltime = 600
/// wait_step = 1
/// threads = 2
///
/// [job]
/// jobType = "Job"
///
/// [[job.steps]]
/// jobType = "ShellJob"
/// params = { COMMAND = "echo hello" }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawJobFile {
    /// Runner defaults from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// The root job.
    pub job: JobDefinition,
}

/// `[config]` section.
///
/// Values become parameters of the root job unless the root job already
/// sets them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigSection {
    /// Wall time of the root runner in seconds; negative means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walltime: Option<f64>,

    /// Poll period of the root runner in seconds; `<= 0` disables polling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_step: Option<f64>,

    /// Thread count for the root job's steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

impl ConfigSection {
    /// Let command-line values win over the file.
    pub fn override_with(
        &mut self,
        walltime: Option<f64>,
        wait_step: Option<f64>,
        threads: Option<usize>,
    ) {
        if walltime.is_some() {
            self.walltime = walltime;
        }
        if wait_step.is_some() {
            self.wait_step = wait_step;
        }
        if threads.is_some() {
            self.threads = threads;
        }
    }
}

/// Validated job file.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub config: ConfigSection,
    pub job: JobDefinition,
}

impl JobFile {
    pub(crate) fn new_unchecked(config: ConfigSection, job: JobDefinition) -> Self {
        Self { config, job }
    }

    /// The root definition with `[config]` folded into its parameters.
    pub fn root_definition(&self) -> JobDefinition {
        let mut root = self.job.clone();
        let params = root.params_mut();
        if let Some(walltime) = self.config.walltime {
            if !params.contains(keys::WALLTIME) {
                params.set(keys::WALLTIME, walltime.to_string());
            }
        }
        if let Some(wait_step) = self.config.wait_step {
            if !params.contains(keys::WAITSTEP) {
                params.set(keys::WAITSTEP, wait_step.to_string());
            }
        }
        if let Some(threads) = self.config.threads {
            if !params.contains(keys::NUMTHREADS) {
                params.set(keys::NUMTHREADS, threads.to_string());
            }
        }
        root
    }

    pub fn build(&self, factory: &JobFactory) -> Result<Arc<Job>> {
        factory.build(&self.root_definition())
    }
}
