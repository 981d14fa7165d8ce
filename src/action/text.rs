// src/action/text.rs

//! Text block format of an [`Action`].
//!
//! ```text
//! # rerun the optimisation with a tighter threshold
//! TYPE: REDO
//! OBJECT: FOCUSJOB
//! DETAILS:
//!   set:THRESHOLD = 0.001
//! ```
//!
//! `TYPE` and `OBJECT` are mandatory. Every non-empty line after `DETAILS:`
//! is a `key = value` pair. `#` starts a comment line.

use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

use super::{Action, ActionObject, ActionType};

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut action_type: Option<ActionType> = None;
        let mut object: Option<ActionObject> = None;
        let mut details = std::collections::BTreeMap::new();
        let mut in_details = false;

        for (lineno, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if in_details {
                let (key, value) = line.split_once('=').ok_or_else(|| {
                    EngineError::ActionFormat(format!(
                        "line {}: expected 'key = value' in DETAILS, got '{line}'",
                        lineno + 1
                    ))
                })?;
                details.insert(key.trim().to_string(), value.trim().to_string());
                continue;
            }

            let (key, value) = line.split_once(':').ok_or_else(|| {
                EngineError::ActionFormat(format!(
                    "line {}: expected 'KEY: value', got '{line}'",
                    lineno + 1
                ))
            })?;

            match key.trim().to_uppercase().as_str() {
                "TYPE" => {
                    action_type = Some(value.parse().map_err(EngineError::ActionFormat)?);
                }
                "OBJECT" => {
                    object = Some(value.parse().map_err(EngineError::ActionFormat)?);
                }
                "DETAILS" => in_details = true,
                other => {
                    return Err(EngineError::ActionFormat(format!(
                        "line {}: unknown key '{other}'",
                        lineno + 1
                    )));
                }
            }
        }

        let action_type = action_type
            .ok_or_else(|| EngineError::ActionFormat("missing TYPE".to_string()))?;
        let object =
            object.ok_or_else(|| EngineError::ActionFormat("missing OBJECT".to_string()))?;

        Ok(Action {
            action_type,
            object,
            details,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TYPE: {}", self.action_type)?;
        writeln!(f, "OBJECT: {}", self.object)?;
        if !self.details.is_empty() {
            writeln!(f, "DETAILS:")?;
            for (key, value) in &self.details {
                writeln!(f, "  {key} = {value}")?;
            }
        }
        Ok(())
    }
}
