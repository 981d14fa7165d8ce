// src/job/output.rs

//! Named artifacts a job chooses to expose.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::action::Action;
use crate::job::evaluation::Situation;
use crate::job::id::JobId;

/// Reserved output keys.
pub mod keys {
    pub const REQUESTED_ACTION: &str = "REQUESTEDACTION";
    pub const SITUATION: &str = "SITUATION";
    pub const EVALUATED_JOB: &str = "EVALUATEDJOB";
    pub const ACTION_REQUEST_BY_SUBJOB: &str = "ACTIONREQUESTBYSUBJOB";
    pub const SUBJOB_REQUESTING_ACTION: &str = "SUBJOBREQUESTINGACTION";
    pub const EXITCODE: &str = "EXITCODE";
    pub const STDOUT: &str = "STDOUT";
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Text(String),
    Integer(i64),
    Action(Action),
    Situation(Situation),
    JobRef(JobId),
    Json(serde_json::Value),
}

impl OutputValue {
    /// Text view used by perceivers: text as-is, numbers formatted, JSON
    /// rendered compactly.
    pub fn as_text(&self) -> Option<String> {
        match self {
            OutputValue::Text(s) => Some(s.clone()),
            OutputValue::Integer(i) => Some(i.to_string()),
            OutputValue::Json(v) => Some(v.to_string()),
            OutputValue::JobRef(id) => Some(id.to_string()),
            OutputValue::Action(_) | OutputValue::Situation(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            OutputValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            OutputValue::Action(a) => Some(a),
            _ => None,
        }
    }
}

/// Mutex-guarded map written by the job's own task; last write wins.
#[derive(Debug, Default)]
pub struct ExposedOutput {
    entries: Mutex<BTreeMap<String, OutputValue>>,
}

impl ExposedOutput {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, OutputValue>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn expose(&self, key: impl Into<String>, value: OutputValue) {
        self.lock().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<OutputValue> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<OutputValue> {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, OutputValue> {
        self.lock().clone()
    }
}
