// src/job/id.rs

//! Path-like job identifiers and relative navigation paths.
//!
//! A root job is `#N` (`#0` for a free-standing root). A step gets
//! `<parent id>.<local id>`, where the local id comes from a counter owned by
//! the parent and starting at 1. Parents are never referenced directly; they
//! are resolved by walking ids from the root.

use std::fmt;

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn root(number: u32) -> Self {
        JobId(format!("#{number}"))
    }

    pub fn child(&self, local: u32) -> Self {
        JobId(format!("{}.{local}", self.0))
    }

    pub fn parent(&self) -> Option<JobId> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| JobId(parent.to_string()))
    }

    /// Last path segment: the local id for a step, `#N` for a root.
    pub fn local(&self) -> &str {
        match self.0.rsplit_once('.') {
            Some((_, local)) => local,
            None => &self.0,
        }
    }

    /// Same local id, re-rooted under `parent`.
    pub fn reparented(&self, parent: &JobId) -> JobId {
        JobId(format!("{}.{}", parent.0, self.local()))
    }

    pub fn depth(&self) -> usize {
        self.0.matches('.').count()
    }

    pub fn is_ancestor_of(&self, other: &JobId) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        JobId::root(0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a relative navigation path such as `-1.2` or `#0,1`.
///
/// The first element says how many levels to climb (negative values) before
/// descending; zero or positive values mean "start here". Every following
/// element is a 0-based step index.
pub fn parse_path(path: &str) -> Result<Vec<i64>> {
    let cleaned = path.trim().trim_start_matches('#').replace(',', ".");
    if cleaned.is_empty() {
        return Err(EngineError::ConfigError(
            "empty job navigation path".to_string(),
        ));
    }

    cleaned
        .split('.')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|e| {
                EngineError::ConfigError(format!(
                    "invalid job navigation path '{path}': {e}"
                ))
            })
        })
        .collect()
}
