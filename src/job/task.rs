// src/job/task.rs

//! Pluggable unit of work for domain-specific jobs.
//!
//! The engine never interprets what a job computes. A [`JobTask`] is the
//! opaque, executable part of a job description: it receives its job,
//! reads parameters, does its work and exposes whatever artifacts it wants
//! other jobs (typically evaluators) to see.

use std::fmt;

pub use futures::future::BoxFuture;

use crate::errors::JobError;
use crate::job::Job;

pub trait JobTask: Send + Sync + fmt::Debug {
    /// Do the work of `job`.
    ///
    /// Cancellation is cooperative by drop: when the job is stopped, the
    /// returned future is dropped at its next await point.
    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), JobError>>;
}
