// src/config/validate.rs

use crate::config::model::{ConfigSection, JobFile, RawJobFile};
use crate::errors::{EngineError, Result};
use crate::exec::ShellCommand;
use crate::job::evaluation::{MatchOutput, PerceiverSpec};
use crate::job::id::parse_path;
use crate::job::JobDefinition;
use crate::types::{Parameters, keys};

impl TryFrom<RawJobFile> for JobFile {
    type Error = EngineError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        validate_config_section(&raw.config)?;
        let file = JobFile::new_unchecked(raw.config, raw.job);
        validate_definition(&file.root_definition(), "#0")?;
        Ok(file)
    }
}

fn validate_config_section(cfg: &ConfigSection) -> Result<()> {
    if let Some(walltime) = cfg.walltime {
        if !walltime.is_finite() || walltime == 0.0 {
            return Err(EngineError::ConfigError(format!(
                "[config].walltime must be a positive number of seconds or negative for unbounded (got {walltime})"
            )));
        }
    }
    if let Some(wait_step) = cfg.wait_step {
        if !wait_step.is_finite() {
            return Err(EngineError::ConfigError(format!(
                "[config].wait_step must be a finite number of seconds (got {wait_step})"
            )));
        }
    }
    if cfg.threads == Some(0) {
        return Err(EngineError::ConfigError(
            "[config].threads must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

/// Check one definition and its subtree. `at` names the node in messages.
fn validate_definition(def: &JobDefinition, at: &str) -> Result<()> {
    let params = def.params();
    validate_runner_params(params, at)?;

    match def {
        JobDefinition::ShellJob { .. } => {
            ShellCommand::from_params(params)
                .map_err(|e| EngineError::ConfigError(format!("job {at}: {e}")))?;
        }
        JobDefinition::TaskJob { task, .. } if task.trim().is_empty() => {
            return Err(EngineError::ConfigError(format!(
                "job {at}: TaskJob needs a task name"
            )));
        }
        JobDefinition::EvaluationJob {
            focus, perceiver, ..
        } => validate_evaluation(focus, perceiver, at)?,
        JobDefinition::MonitoringJob {
            focus, perceiver, ..
        } => {
            validate_evaluation(focus, perceiver, at)?;
            validate_monitor_schedule(params, at)?;
        }
        JobDefinition::JobLooper {
            template,
            iterations,
            ..
        } => {
            if *iterations == 0 {
                return Err(EngineError::ConfigError(format!(
                    "job {at}: JobLooper needs at least one iteration"
                )));
            }
            validate_definition(template, &format!("{at} (template)"))?;
        }
        _ => {}
    }

    let steps = def.steps();
    if steps
        .iter()
        .any(|s| matches!(s, JobDefinition::MonitoringJob { .. }))
        && !runs_parallel(def)
    {
        return Err(EngineError::ConfigError(format!(
            "job {at}: monitoring jobs need a parallel parent ({} > 1 and every step parallelizable)",
            keys::NUMTHREADS
        )));
    }

    for (index, step) in steps.iter().enumerate() {
        validate_definition(step, &format!("{at}.{}", index + 1))?;
    }
    Ok(())
}

fn validate_runner_params(params: &Parameters, at: &str) -> Result<()> {
    let context = |e: EngineError| EngineError::ConfigError(format!("job {at}: {e}"));
    params.parsed::<f64>(keys::WALLTIME).map_err(context)?;
    params.parsed::<f64>(keys::WAITSTEP).map_err(context)?;
    if params.parsed::<usize>(keys::NUMTHREADS).map_err(context)? == Some(0) {
        return Err(EngineError::ConfigError(format!(
            "job {at}: {} must be >= 1",
            keys::NUMTHREADS
        )));
    }
    Ok(())
}

fn validate_evaluation(focus: &str, perceiver: &PerceiverSpec, at: &str) -> Result<()> {
    parse_path(focus).map_err(|e| EngineError::ConfigError(format!("job {at}: {e}")))?;
    match perceiver {
        PerceiverSpec::Named(name) if name.trim().is_empty() => Err(EngineError::ConfigError(
            format!("job {at}: perceiver name is empty"),
        )),
        PerceiverSpec::Named(_) => Ok(()),
        PerceiverSpec::Rules(rules) => {
            if rules.is_empty() {
                return Err(EngineError::ConfigError(format!(
                    "job {at}: perceiver needs at least one rule"
                )));
            }
            MatchOutput::new(rules.clone())
                .map(|_| ())
                .map_err(|e| EngineError::ConfigError(format!("job {at}: {e}")))
        }
    }
}

fn validate_monitor_schedule(params: &Parameters, at: &str) -> Result<()> {
    let context = |e: EngineError| EngineError::ConfigError(format!("job {at}: {e}"));
    params
        .duration(keys::INITIALDELAY, keys::INITIALDELAY_UNITS)
        .map_err(context)?;
    let period = params
        .duration(keys::PERIOD, keys::PERIOD_UNITS)
        .map_err(context)?;
    if period.is_some_and(|p| p.is_zero()) {
        return Err(EngineError::ConfigError(format!(
            "job {at}: monitoring period must be > 0"
        )));
    }
    Ok(())
}

/// Same rule the engine applies when choosing a runner.
fn runs_parallel(def: &JobDefinition) -> bool {
    let threads = def
        .params()
        .parsed::<usize>(keys::NUMTHREADS)
        .ok()
        .flatten()
        .unwrap_or(1);
    let steps = def.steps();
    threads > 1 && !steps.is_empty() && steps.iter().all(is_parallelizable)
}

fn is_parallelizable(def: &JobDefinition) -> bool {
    def.params().flag(keys::PARALLELIZABLE).unwrap_or(matches!(
        def,
        JobDefinition::EvaluationJob { .. } | JobDefinition::MonitoringJob { .. }
    ))
}
