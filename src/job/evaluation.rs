// src/job/evaluation.rs

//! Evaluation of a focus job by a [`SituationPerceiver`].
//!
//! An evaluation inspects the focus job's state and exposed output and, if
//! it perceives a known situation, exposes it. A situation may carry a
//! reaction; that reaction becomes the evaluation job's requested action.
//! Deciding *whether* a situation needs healing is entirely up to the
//! perceiver.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::action::Action;
use crate::errors::{EngineError, JobError, Result};
use crate::job::Job;
use crate::job::output::{OutputValue, keys};

/// A perceived condition of a job, optionally carrying a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Situation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<Action>,
}

impl Situation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reaction: None,
        }
    }

    pub fn with_reaction(mut self, action: Action) -> Self {
        self.reaction = Some(action);
        self
    }
}

/// Situation detection, supplied by the caller.
pub trait SituationPerceiver: Send + Sync + fmt::Debug {
    /// Registry name used by job files.
    fn name(&self) -> &str;

    /// Inspect the focus job. `Ok(None)` means nothing known was perceived.
    fn perceive(&self, focus: &Job) -> std::result::Result<Option<Situation>, JobError>;
}

/// One rule of [`MatchOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    /// Exposed output key of the focus job to look at.
    pub output: String,
    /// Regular expression searched in the text view of that output.
    pub pattern: String,
    pub situation: Situation,
}

/// Built-in perceiver: the first rule whose pattern matches wins.
#[derive(Debug, Clone)]
pub struct MatchOutput {
    rules: Vec<(Regex, MatchRule)>,
}

impl MatchOutput {
    pub const NAME: &'static str = "match-output";

    pub fn new(rules: Vec<MatchRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let re = Regex::new(&rule.pattern).map_err(|e| {
                    EngineError::ConfigError(format!(
                        "invalid pattern '{}' for situation '{}': {e}",
                        rule.pattern, rule.situation.name
                    ))
                })?;
                Ok((re, rule))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> Vec<MatchRule> {
        self.rules.iter().map(|(_, rule)| rule.clone()).collect()
    }
}

impl SituationPerceiver for MatchOutput {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn perceive(&self, focus: &Job) -> std::result::Result<Option<Situation>, JobError> {
        for (re, rule) in &self.rules {
            let Some(text) = focus.output(&rule.output).and_then(|v| v.as_text()) else {
                continue;
            };
            if re.is_match(&text) {
                return Ok(Some(rule.situation.clone()));
            }
        }
        Ok(None)
    }
}

/// How the perceiver of an evaluation is described in a job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerceiverSpec {
    /// A perceiver registered in the [`JobFactory`](crate::job::JobFactory).
    Named(String),
    /// Inline [`MatchOutput`] rules.
    Rules(Vec<MatchRule>),
}

/// The evaluation part of an evaluation or monitoring job.
pub struct Evaluation {
    focus: RwLock<Weak<Job>>,
    focus_path: Option<String>,
    perceiver: Arc<dyn SituationPerceiver>,
    spec: PerceiverSpec,
}

impl fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluation")
            .field("focus", &self.focus().map(|j| j.id()))
            .field("focus_path", &self.focus_path)
            .field("perceiver", &self.perceiver.name())
            .finish()
    }
}

impl Evaluation {
    pub fn new(perceiver: Arc<dyn SituationPerceiver>) -> Self {
        let spec = PerceiverSpec::Named(perceiver.name().to_string());
        Self {
            focus: RwLock::new(Weak::new()),
            focus_path: None,
            perceiver,
            spec,
        }
    }

    pub fn focusing_on(focus: &Arc<Job>, perceiver: Arc<dyn SituationPerceiver>) -> Self {
        let evaluation = Self::new(perceiver);
        evaluation.set_focus(focus);
        evaluation
    }

    pub fn from_rules(rules: Vec<MatchRule>) -> Result<Self> {
        let perceiver = MatchOutput::new(rules.clone())?;
        let mut evaluation = Self::new(Arc::new(perceiver));
        evaluation.spec = PerceiverSpec::Rules(rules);
        Ok(evaluation)
    }

    /// Relative path (see [`Job::navigate`]) resolved once the tree is built.
    pub fn with_focus_path(mut self, path: impl Into<String>) -> Self {
        self.focus_path = Some(path.into());
        self
    }

    pub fn focus(&self) -> Option<Arc<Job>> {
        self.focus
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .upgrade()
    }

    pub fn set_focus(&self, focus: &Arc<Job>) {
        *self.focus.write().unwrap_or_else(|p| p.into_inner()) = Arc::downgrade(focus);
    }

    pub fn focus_path(&self) -> Option<&str> {
        self.focus_path.as_deref()
    }

    pub fn perceiver(&self) -> &Arc<dyn SituationPerceiver> {
        &self.perceiver
    }

    pub fn perceiver_spec(&self) -> &PerceiverSpec {
        &self.spec
    }

    /// Run one perception and expose its conclusions on `job`.
    pub(crate) fn evaluate(&self, job: &Job) -> std::result::Result<(), JobError> {
        let focus = self
            .focus()
            .ok_or_else(|| JobError::config(job.id(), "evaluation has no focus job"))?;

        job.expose(keys::EVALUATED_JOB, OutputValue::JobRef(focus.id()));

        match self.perceiver.perceive(&focus)? {
            Some(situation) => {
                info!(
                    job = %job.id(),
                    focus = %focus.id(),
                    situation = %situation.name,
                    "situation perceived"
                );
                if let Some(action) = situation.reaction.clone() {
                    job.expose(keys::REQUESTED_ACTION, OutputValue::Action(action));
                }
                job.expose(keys::SITUATION, OutputValue::Situation(situation));
            }
            None => {
                debug!(job = %job.id(), focus = %focus.id(), "no known situation perceived");
            }
        }
        Ok(())
    }
}

/// Delay and period of a monitoring job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSchedule {
    pub delay: std::time::Duration,
    pub period: std::time::Duration,
}
