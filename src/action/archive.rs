// src/action/archive.rs

//! Archiving of a rerun job's previous results.
//!
//! Before a job is rerun, files it left in its `WORKDIR` can be set aside in
//! a `Job_<id>_<restart>` folder so the next run does not overwrite them.
//! Action details select the files:
//!
//! ```text
//! DETAILS:
//!   archive:move = *.log, *.out
//!   archive:copy = restart.chk
//!   archive:delete = *.tmp
//! ```
//!
//! Patterns are globs matched against file names anywhere below `WORKDIR`.
//! Copied files also stay in place for the rerun. A file matched by a move
//! or copy pattern is never deleted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::errors::{EngineError, Result};
use crate::job::{Job, JobId};
use crate::types::keys;

pub const ARCHIVE_MOVE: &str = "archive:move";
pub const ARCHIVE_COPY: &str = "archive:copy";
pub const ARCHIVE_DELETE: &str = "archive:delete";

/// Folders starting with this prefix are archives and never searched.
pub const ARCHIVE_DIR_PREFIX: &str = "Job_";

/// What happens to a matched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivingTask {
    Move,
    Copy,
    Delete,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveRules {
    moves: Option<GlobSet>,
    copies: Option<GlobSet>,
    deletes: Option<GlobSet>,
}

impl ArchiveRules {
    /// Compile the `archive:*` details of `action`. Values are
    /// comma-separated pattern lists.
    pub fn from_action(action: &Action) -> Result<Self> {
        let compile = |key: &str| -> Result<Option<GlobSet>> {
            let Some(value) = action.details.get(key) else {
                return Ok(None);
            };
            let patterns: Vec<&str> = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if patterns.is_empty() {
                return Ok(None);
            }
            build_globset(&patterns).map(Some)
        };

        Ok(Self {
            moves: compile(ARCHIVE_MOVE)?,
            copies: compile(ARCHIVE_COPY)?,
            deletes: compile(ARCHIVE_DELETE)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_none() && self.copies.is_none() && self.deletes.is_none()
    }

    /// Copy wins over move, and both win over delete.
    pub fn classify(&self, file_name: &str) -> Option<ArchivingTask> {
        let hit = |set: &Option<GlobSet>| set.as_ref().is_some_and(|s| s.is_match(file_name));

        let task = if hit(&self.copies) {
            ArchivingTask::Copy
        } else if hit(&self.moves) {
            ArchivingTask::Move
        } else if hit(&self.deletes) {
            return Some(ArchivingTask::Delete);
        } else {
            return None;
        };
        if hit(&self.deletes) {
            warn!(file = file_name, "file matches a delete pattern but is archived instead");
        }
        Some(task)
    }

    /// Archive the previous results of every job in `jobs`.
    pub fn apply(&self, jobs: &[std::sync::Arc<Job>], restart: u32) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        for job in jobs {
            self.archive_job(job, restart)?;
        }
        Ok(())
    }

    /// Archive the files of one job; returns the archive folder if one was
    /// created. Monitors and jobs without an existing `WORKDIR` are skipped.
    pub fn archive_job(&self, job: &Job, restart: u32) -> Result<Option<PathBuf>> {
        if job.is_monitoring() {
            return Ok(None);
        }
        let Some(workdir) = job.param(keys::WORKDIR) else {
            return Ok(None);
        };
        let root = PathBuf::from(workdir);
        if !root.is_dir() {
            debug!(job = %job.id(), workdir = %root.display(), "nothing to archive");
            return Ok(None);
        }

        let mut plan = Vec::new();
        for path in files_below(&root)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(task) = self.classify(name) {
                plan.push((path, task));
            }
        }

        let mut archive: Option<PathBuf> = None;
        for (path, task) in &plan {
            if *task == ArchivingTask::Delete {
                fs::remove_file(path)
                    .with_context(|| format!("deleting {}", path.display()))?;
                continue;
            }

            let folder = match &archive {
                Some(folder) => folder.clone(),
                None => {
                    let folder = create_archive_folder(&root, &job.id(), restart)?;
                    archive = Some(folder.clone());
                    folder
                }
            };
            let rel = path.strip_prefix(&root).unwrap_or(path);
            let dest = folder.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            match task {
                ArchivingTask::Move => fs::rename(path, &dest)
                    .with_context(|| format!("moving {} to {}", path.display(), dest.display()))?,
                _ => {
                    fs::copy(path, &dest).with_context(|| {
                        format!("copying {} to {}", path.display(), dest.display())
                    })?;
                }
            }
        }

        if let Some(folder) = &archive {
            info!(
                job = %job.id(),
                restart,
                files = plan.len(),
                archive = %folder.display(),
                "archived previous results"
            );
        }
        Ok(archive)
    }
}

/// Name of the archive folder of `id` before restart `restart`.
pub fn archive_folder_name(id: &JobId, restart: u32) -> String {
    let label = id.as_str().trim_start_matches('#');
    format!("{ARCHIVE_DIR_PREFIX}{label}_{restart}")
}

fn create_archive_folder(root: &Path, id: &JobId, restart: u32) -> Result<PathBuf> {
    let base = archive_folder_name(id, restart);
    let mut folder = root.join(&base);
    let mut suffix = 1;
    while folder.exists() {
        folder = root.join(format!("{base}.{suffix}"));
        suffix += 1;
    }
    fs::create_dir_all(&folder).with_context(|| format!("creating {}", folder.display()))?;
    Ok(folder)
}

fn files_below(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("reading dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                let archived = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(ARCHIVE_DIR_PREFIX));
                if !archived {
                    stack.push(path);
                }
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).map_err(|e| {
            EngineError::ConfigError(format!("invalid archive pattern '{pat}': {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::ConfigError(format!("invalid archive patterns: {e}")))
}
