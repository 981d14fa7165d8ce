// src/action/applier.rs

//! Tree surgery boundary.
//!
//! Runners decide *when* an action is applied; an [`ActionApplier`] decides
//! *how* the workflow changes. It receives the master job (the workflow),
//! the focus job and the requester, and returns the jobs the runner should
//! (re)submit. An empty list means nothing is left to run.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::archive::ArchiveRules;
use crate::action::{Action, ActionObject, ActionType};
use crate::errors::{EngineError, Result};
use crate::job::Job;

pub trait ActionApplier: Send + Sync {
    fn apply(
        &self,
        action: &Action,
        workflow: &Arc<Job>,
        focus: Option<&Arc<Job>>,
        requester: &Arc<Job>,
        restart: u32,
    ) -> Result<Vec<Arc<Job>>>;
}

/// Detail key prefix that sets a parameter on the action's object jobs.
pub const SET_PARAMETER: &str = "set:";
/// Detail key prefix that removes a parameter from the action's object jobs.
pub const UNSET_PARAMETER: &str = "unset:";

/// Applier shipped with the engine.
///
/// Serial workflows:
/// - `REDO` reruns the steps from the focus job onward,
/// - `REDOAFTER` reruns the steps after the focus job.
///
/// Parallel workflows:
/// - `REDO` of `PARALLELJOB` reruns every step,
/// - `REDO` of `FOCUSJOB` reruns the focus job and the requester.
///
/// Every other combination returns no jobs. Completed steps are never
/// removed from the master; rerun jobs are reset in place. Before the reset,
/// `archive:*` details set aside the previous results of the rerun jobs
/// (see [`ArchiveRules`]), then `set:KEY` and `unset:KEY` details edit the
/// parameters of the focus job (and of the following steps for
/// `FOCUSANDFOLLOWINGJOBS`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultActionApplier;

impl ActionApplier for DefaultActionApplier {
    fn apply(
        &self,
        action: &Action,
        workflow: &Arc<Job>,
        focus: Option<&Arc<Job>>,
        requester: &Arc<Job>,
        restart: u32,
    ) -> Result<Vec<Arc<Job>>> {
        if !action.is_redo() {
            debug!(
                action = %action.action_type,
                object = %action.object,
                "action needs no rerun"
            );
            return Ok(Vec::new());
        }

        let archive = ArchiveRules::from_action(action)?;
        let steps = workflow.steps();
        let parallel = workflow.runs_parallel_subjobs();

        let (todo, edited) = match action.object {
            ActionObject::ParallelJob => (steps.clone(), steps),
            ActionObject::FocusJob | ActionObject::FocusAndFollowingJobs => {
                let focus = focus.ok_or_else(|| {
                    EngineError::ConfigError(format!(
                        "{} of {} requested by {} has no focus job",
                        action.action_type,
                        action.object,
                        requester.id()
                    ))
                })?;
                let index = workflow.step_index(focus).ok_or_else(|| {
                    EngineError::ConfigError(format!(
                        "focus job {} is not a step of {}",
                        focus.id(),
                        workflow.id()
                    ))
                })?;

                let edited = if action.object == ActionObject::FocusAndFollowingJobs {
                    steps[index..].to_vec()
                } else {
                    vec![Arc::clone(focus)]
                };

                let todo = if parallel {
                    let mut todo = vec![Arc::clone(focus)];
                    if !Arc::ptr_eq(focus, requester) {
                        todo.push(Arc::clone(requester));
                    }
                    todo
                } else {
                    let from = match action.action_type {
                        ActionType::RedoAfter => index + 1,
                        _ => index,
                    };
                    steps[from.min(steps.len())..].to_vec()
                };
                (todo, edited)
            }
            other => {
                warn!(
                    action = %action.action_type,
                    object = %other,
                    "default applier does not handle this object; nothing to rerun"
                );
                return Ok(Vec::new());
            }
        };

        debug!(
            workflow = %workflow.id(),
            restart,
            jobs = ?todo.iter().map(|j| j.id()).collect::<Vec<_>>(),
            "jobs to rerun"
        );
        archive.apply(&todo, restart)?;
        edit_parameters(action, &edited);
        for job in &todo {
            job.reset_run_status();
        }
        Ok(todo)
    }
}

fn edit_parameters(action: &Action, jobs: &[Arc<Job>]) {
    for (key, value) in &action.details {
        if let Some(param) = key.strip_prefix(SET_PARAMETER) {
            for job in jobs {
                job.set_param(param.trim(), value.as_str());
            }
        } else if let Some(param) = key.strip_prefix(UNSET_PARAMETER) {
            for job in jobs {
                job.remove_param(param.trim());
            }
        }
    }
}
