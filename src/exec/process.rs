// src/exec/process.rs

//! External process runner used by shell jobs.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::types::{Parameters, keys};

static ARG_SPLITTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\s"']+|"[^"]*"|'[^']*'"#).expect("argument splitter regex is valid")
});

/// Program, arguments and working directory of a shell job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl ShellCommand {
    /// Build from `COMMAND`, or `INTERPRETER` + `SCRIPT` (+ `ARGS`).
    pub fn from_params(params: &Parameters) -> std::result::Result<Self, String> {
        let workdir = params.get(keys::WORKDIR).map(PathBuf::from);

        if let Some(command) = params.get(keys::COMMAND) {
            let mut words = split_args(command).into_iter();
            let program = words
                .next()
                .ok_or_else(|| format!("parameter {} is empty", keys::COMMAND))?;
            let mut args: Vec<String> = words.collect();
            if let Some(extra) = params.get(keys::ARGS) {
                args.extend(split_args(extra));
            }
            return Ok(Self {
                program,
                args,
                workdir,
            });
        }

        match (params.get(keys::INTERPRETER), params.get(keys::SCRIPT)) {
            (Some(interpreter), Some(script)) if !interpreter.trim().is_empty() => {
                let mut args = vec![script.to_string()];
                if let Some(extra) = params.get(keys::ARGS) {
                    args.extend(split_args(extra));
                }
                Ok(Self {
                    program: interpreter.trim().to_string(),
                    args,
                    workdir,
                })
            }
            _ => Err(format!(
                "shell job needs {} or {} + {}",
                keys::COMMAND,
                keys::INTERPRETER,
                keys::SCRIPT
            )),
        }
    }
}

/// Split a command line on whitespace, keeping quoted groups together and
/// stripping their quotes.
pub fn split_args(line: &str) -> Vec<String> {
    ARG_SPLITTER
        .find_iter(line)
        .map(|m| {
            let word = m.as_str();
            let quoted = word.len() >= 2
                && ((word.starts_with('"') && word.ends_with('"'))
                    || (word.starts_with('\'') && word.ends_with('\'')));
            if quoted {
                word[1..word.len() - 1].to_string()
            } else {
                word.to_string()
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i64,
    pub stdout: String,
}

/// Run a process to completion, capturing stdout and logging stderr.
///
/// The child is killed if the returned future is dropped, which is how job
/// cancellation reaches the process.
pub async fn run_process(cmd: &ShellCommand, job: &str) -> Result<ProcessOutput> {
    info!(
        job = %job,
        program = %cmd.program,
        args = ?cmd.args,
        "starting process"
    );

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &cmd.workdir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating work directory {}", dir.display()))?;
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process '{}' for job {job}", cmd.program))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let job = job.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %job, "stderr: {}", line);
            }
        });
    }

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)
            .await
            .with_context(|| format!("reading stdout of job {job}"))?;
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of job {job}"))?;
    let exit_code = i64::from(status.code().unwrap_or(-1));

    info!(
        job = %job,
        exit_code,
        success = status.success(),
        "process exited"
    );

    Ok(ProcessOutput { exit_code, stdout })
}
