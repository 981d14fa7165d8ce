// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_job_path;

/// Command-line arguments for `jobflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobflow",
    version,
    about = "Run a tree of jobs serially or in parallel, reacting to actions requested by evaluators.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job file (TOML, or JSON when it ends in `.json`).
    ///
    /// Default: `Jobflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH")]
    pub job: Option<PathBuf>,

    /// Wall time of the root job in seconds; negative means unbounded.
    ///
    /// Overrides `[config].walltime`.
    #[arg(long, value_name = "SECONDS", allow_negative_numbers = true)]
    pub walltime: Option<f64>,

    /// Poll period of the root runner in seconds.
    ///
    /// Overrides `[config].wait_step`.
    #[arg(long, value_name = "SECONDS")]
    pub wait_step: Option<f64>,

    /// Thread count for the root job's steps.
    ///
    /// Overrides `[config].threads`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub threads: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the job tree, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Parse an action file, print it back and exit.
    #[arg(long, value_name = "PATH", conflicts_with = "dry_run")]
    pub check_action: Option<PathBuf>,
}

impl CliArgs {
    /// The `--job` path, or the default job file.
    pub fn job_path(&self) -> PathBuf {
        self.job.clone().unwrap_or_else(default_job_path)
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
