// src/types.rs

//! Small shared value types: job parameters and time units.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// Parameter keys understood by the engine itself.
pub mod keys {
    pub const WALLTIME: &str = "WALLTIME";
    pub const WAITSTEP: &str = "WAITSTEP";
    pub const NUMTHREADS: &str = "NUMTHREADS";
    pub const PARALLELIZABLE: &str = "PARALLELIZABLE";
    pub const INITIALDELAY: &str = "INITIALDELAY";
    pub const INITIALDELAY_UNITS: &str = "INITIALDELAY-TIMEUNITS";
    pub const PERIOD: &str = "PERIOD";
    pub const PERIOD_UNITS: &str = "PERIOD-TIMEUNITS";
    pub const COMMAND: &str = "COMMAND";
    pub const INTERPRETER: &str = "INTERPRETER";
    pub const SCRIPT: &str = "SCRIPT";
    pub const ARGS: &str = "ARGS";
    pub const WORKDIR: &str = "WORKDIR";
    pub const JOBLOOPITERATION: &str = "JOBLOOPITERATION";
}

/// Opaque key/value settings of a job.
///
/// Values are kept as strings and parsed on use, so a malformed value only
/// becomes an error for the component that actually reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse the value of `key`, if present.
    pub fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                EngineError::ConfigError(format!(
                    "cannot parse parameter {key}='{raw}': {e}"
                ))
            }),
        }
    }

    /// Boolean flag: `true`/`yes`/`1` (case-insensitive) or an empty value.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|raw| {
            matches!(
                raw.trim().to_lowercase().as_str(),
                "" | "true" | "yes" | "1"
            )
        })
    }

    /// Read a duration given as `<key>` plus an optional `<units_key>`.
    ///
    /// Without units the value is taken as seconds.
    pub fn duration(&self, key: &str, units_key: &str) -> Result<Option<Duration>> {
        let Some(amount) = self.parsed::<u64>(key)? else {
            return Ok(None);
        };
        let unit = self
            .parsed::<TimeUnit>(units_key)?
            .unwrap_or(TimeUnit::Seconds);
        unit.to_duration(amount).map(Some).ok_or_else(|| {
            EngineError::ConfigError(format!(
                "parameter {key}={amount} {unit:?} is too long a duration"
            ))
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Time units accepted by the monitoring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// `None` when `amount` of this unit does not fit in a [`Duration`].
    pub fn to_duration(self, amount: u64) -> Option<Duration> {
        let seconds = match self {
            TimeUnit::Milliseconds => return Some(Duration::from_millis(amount)),
            TimeUnit::Seconds => Some(amount),
            TimeUnit::Minutes => amount.checked_mul(60),
            TimeUnit::Hours => amount.checked_mul(3600),
            TimeUnit::Days => amount.checked_mul(86_400),
        };
        seconds.map(Duration::from_secs)
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MILLISECONDS" | "MS" => Ok(TimeUnit::Milliseconds),
            "SECONDS" | "S" => Ok(TimeUnit::Seconds),
            "MINUTES" | "MIN" => Ok(TimeUnit::Minutes),
            "HOURS" | "H" => Ok(TimeUnit::Hours),
            "DAYS" => Ok(TimeUnit::Days),
            other => Err(format!(
                "invalid time unit: {other} (expected MILLISECONDS, SECONDS, MINUTES, HOURS or DAYS)"
            )),
        }
    }
}
