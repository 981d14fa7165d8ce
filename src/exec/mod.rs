// src/exec/mod.rs

//! Execution layer.
//!
//! - [`pool`] owns the bounded worker pools jobs run on.
//! - [`process`] runs the external processes of shell jobs with
//!   `tokio::process::Command`.

pub mod pool;
pub mod process;

pub use pool::WorkerPool;
pub use process::{ProcessOutput, ShellCommand, run_process, split_args};
