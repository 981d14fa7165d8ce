// src/action/mod.rs

//! Requested workflow mutations.
//!
//! An [`Action`] is produced by an evaluation job when it perceives a
//! situation that carries a reaction, and consumed by a runner together with
//! an [`ActionApplier`]. The engine only branches on [`ActionType`] and
//! [`ActionObject`]; `details` are opaque to it and only read by appliers.
//!
//! - [`text`] holds the human-readable block format of an action.
//! - [`applier`] holds the tree-surgery boundary and the default applier.
//! - [`archive`] sets aside previous results of jobs about to be rerun.

pub mod applier;
pub mod archive;
pub mod text;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use applier::{ActionApplier, DefaultActionApplier};
pub use archive::{ArchiveRules, ArchivingTask, archive_folder_name};

/// What to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Redo,
    RedoAfter,
    GoOn,
    Stop,
    Skip,
    Wait,
}

/// What the action applies to, relative to the evaluation that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionObject {
    FocusJob,
    MasterJob,
    PreviousJob,
    ParallelJob,
    SubsequentJob,
    EvalJob,
    FocusAndFollowingJobs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub object: ActionObject,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Action {
    pub fn new(action_type: ActionType, object: ActionObject) -> Self {
        Self {
            action_type,
            object,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// `REDO` and `REDOAFTER` both ask the runner to start over.
    pub fn is_redo(&self) -> bool {
        matches!(self.action_type, ActionType::Redo | ActionType::RedoAfter)
    }
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Redo => "REDO",
            ActionType::RedoAfter => "REDOAFTER",
            ActionType::GoOn => "GOON",
            ActionType::Stop => "STOP",
            ActionType::Skip => "SKIP",
            ActionType::Wait => "WAIT",
        }
    }
}

impl ActionObject {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionObject::FocusJob => "FOCUSJOB",
            ActionObject::MasterJob => "MASTERJOB",
            ActionObject::PreviousJob => "PREVIOUSJOB",
            ActionObject::ParallelJob => "PARALLELJOB",
            ActionObject::SubsequentJob => "SUBSEQUENTJOB",
            ActionObject::EvalJob => "EVALJOB",
            ActionObject::FocusAndFollowingJobs => "FOCUSANDFOLLOWINGJOBS",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ActionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "REDO" => Ok(ActionType::Redo),
            "REDOAFTER" => Ok(ActionType::RedoAfter),
            "GOON" => Ok(ActionType::GoOn),
            "STOP" => Ok(ActionType::Stop),
            "SKIP" => Ok(ActionType::Skip),
            "WAIT" => Ok(ActionType::Wait),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

impl FromStr for ActionObject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FOCUSJOB" => Ok(ActionObject::FocusJob),
            "MASTERJOB" => Ok(ActionObject::MasterJob),
            "PREVIOUSJOB" => Ok(ActionObject::PreviousJob),
            "PARALLELJOB" => Ok(ActionObject::ParallelJob),
            "SUBSEQUENTJOB" => Ok(ActionObject::SubsequentJob),
            "EVALJOB" => Ok(ActionObject::EvalJob),
            "FOCUSANDFOLLOWINGJOBS" => Ok(ActionObject::FocusAndFollowingJobs),
            other => Err(format!("unknown action object: {other}")),
        }
    }
}
