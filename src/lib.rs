// src/lib.rs

pub mod action;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod runner;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::cli::CliArgs;
use crate::config::loader::load_from_path;
use crate::config::model::JobFile;
use crate::job::{Job, JobFactory, RunContext};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - job file loading, CLI overrides and validation
/// - building the job tree
/// - Ctrl-C handling
/// - running the root job to completion
pub async fn run(args: CliArgs) -> Result<()> {
    if let Some(ref path) = args.check_action {
        return check_action(path);
    }

    let job_path = args.job_path();
    let mut raw = load_from_path(&job_path)
        .with_context(|| format!("failed to load job file {}", job_path.display()))?;
    raw.config
        .override_with(args.walltime, args.wait_step, args.threads);
    let file = JobFile::try_from(raw)?;

    let root = file.build(&JobFactory::new())?;

    if args.dry_run {
        print_dry_run(&file, &root);
        return Ok(());
    }

    // Ctrl-C → interrupt the whole tree.
    {
        let root = Arc::clone(&root);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!(job = %root.id(), "interrupt received, stopping jobs");
            root.stop_job();
        });
    }

    info!(job = %root.id(), path = %job_path.display(), "running job tree");
    Arc::clone(&root).run(RunContext::default()).await;

    if let Some(err) = root.exception() {
        bail!("job {} failed: {err}", root.id());
    }
    if root.is_interrupted() {
        bail!("job {} was interrupted before finishing", root.id());
    }

    info!(job = %root.id(), "job tree completed");
    Ok(())
}

/// Parse an action file and print it back in canonical form.
fn check_action(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read action file {}", path.display()))?;
    let action: Action = text.parse()?;
    print!("{action}");
    debug!(action_type = %action.action_type, object = %action.object, "action parsed");
    Ok(())
}

/// Print the validated tree without running anything.
fn print_dry_run(file: &JobFile, root: &Arc<Job>) {
    println!("jobflow dry-run");
    if let Some(walltime) = file.config.walltime {
        println!("  config.walltime = {walltime}");
    }
    if let Some(wait_step) = file.config.wait_step {
        println!("  config.wait_step = {wait_step}");
    }
    if let Some(threads) = file.config.threads {
        println!("  config.threads = {threads}");
    }
    println!();
    print_job(root, 0);

    debug!("dry-run complete (no execution)");
}

fn print_job(job: &Arc<Job>, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    let mode = if job.has_steps() {
        if job.runs_parallel_subjobs() {
            format!(" [parallel, {} threads]", job.threads())
        } else {
            " [serial]".to_string()
        }
    } else {
        String::new()
    };
    println!("{indent}- {} {}{mode}", job.id(), job.kind().type_name());

    if let Some(path) = job.evaluation_part().and_then(|e| e.focus_path()) {
        println!("{indent}    focus: {path}");
    }
    for (key, value) in job.params().iter() {
        println!("{indent}    {key}: {value}");
    }
    for step in job.steps() {
        print_job(&step, depth + 1);
    }
}
