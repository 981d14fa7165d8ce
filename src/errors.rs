// src/errors.rs

//! Crate-wide error types and aliases.
//!
//! - [`EngineError`] covers everything that stops the engine from being
//!   set up or driven (bad job files, out-of-range step lookups, IO).
//! - [`JobError`] is the exception captured on a job while it runs. It is
//!   stored on the job and surfaced to whoever runs it; it never unwinds
//!   through the runner.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Step index {index} out of range for job {job} ({len} steps)")]
    StepOutOfRange {
        job: String,
        index: usize,
        len: usize,
    },

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid action text: {0}")]
    ActionFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Errors caused by the user's job description or parameters.
    ///
    /// These are fatal: the CLI reports them and exits with a nonzero
    /// status. They are never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigError(_)
                | EngineError::StepOutOfRange { .. }
                | EngineError::UnknownJobType(_)
                | EngineError::ActionFormat(_)
                | EngineError::TomlError(_)
                | EngineError::JsonError(_)
        )
    }
}

/// Exception captured on a job during `run()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job {job} failed: {message}")]
    Execution { job: String, message: String },

    #[error("job {master} aborted because sub-job {job} failed: {cause}")]
    SubJob {
        master: String,
        job: String,
        cause: String,
    },

    #[error("job {job} is misconfigured: {message}")]
    Config { job: String, message: String },
}

impl JobError {
    pub fn execution(job: impl ToString, message: impl ToString) -> Self {
        JobError::Execution {
            job: job.to_string(),
            message: message.to_string(),
        }
    }

    pub fn config(job: impl ToString, message: impl ToString) -> Self {
        JobError::Config {
            job: job.to_string(),
            message: message.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
