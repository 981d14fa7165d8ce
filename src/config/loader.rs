// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{JobFile, RawJobFile};
use crate::errors::Result;

/// Read a job file without semantic validation.
///
/// Files ending in `.json` are parsed as JSON, everything else as TOML.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let raw = if is_json {
        serde_json::from_str(&contents)?
    } else {
        toml::from_str(&contents)?
    };
    Ok(raw)
}

/// Read a job file and check it (parameters, shell commands, focus paths,
/// perceiver rules, monitor placement).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobFile> {
    let raw = load_from_path(&path)?;
    JobFile::try_from(raw)
}

/// File name looked up when no `--job` is given.
pub const DEFAULT_JOB_FILE: &str = "Jobflow.toml";

/// [`DEFAULT_JOB_FILE`] in the current working directory.
pub fn default_job_path() -> PathBuf {
    PathBuf::from(DEFAULT_JOB_FILE)
}
