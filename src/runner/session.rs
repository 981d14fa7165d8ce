// src/runner/session.rs

//! Pure session state machines.
//!
//! A session is one attempt of a runner. Its logic lives in a synchronous
//! [`SessionCore`] that consumes [`SessionEvent`]s and returns a
//! [`SessionStep`]: the commands the async shell (`JobsRunner`) should carry
//! out, and whether the session is over.
//!
//! Cores own no channels, timers or pools. They only read job flags, so
//! they can be driven step by step in tests without a runtime.

use std::sync::Arc;

use tracing::debug;

use crate::action::Action;
use crate::errors::JobError;
use crate::job::{Job, JobId};
use crate::runner::listener::Notification;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every submitted job completed.
    Completed,
    /// A redo was requested; the runner applies it and starts over.
    Restart,
    /// A stop was requested; remaining work is never submitted.
    Halted,
    /// A job raised an exception; nothing was applied.
    Exception { job: JobId, error: JobError },
    /// Wall time elapsed.
    OutOfTime,
    /// The master job was stopped from outside.
    Interrupted,
}

#[derive(Debug)]
pub enum SessionEvent {
    Notified(Notification),
    /// Periodic wake-up (wait step).
    Poll,
    WallTimeElapsed,
    MasterStopped,
    ApplierFailed { job: JobId, message: String },
}

/// An accepted action request waiting to be applied.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub action: Action,
    pub requester: Arc<Job>,
    pub focus: Option<Arc<Job>>,
}

impl PendingRequest {
    pub fn new(action: Action, requester: Arc<Job>) -> Self {
        let focus = requester.evaluation_part().and_then(|e| e.focus());
        Self {
            action,
            requester,
            focus,
        }
    }
}

#[derive(Debug)]
pub enum SessionCommand {
    /// Hand jobs to the worker pools.
    Submit(Vec<Arc<Job>>),
    /// Publish an accepted request on the master job.
    RecordRequest(PendingRequest),
    /// Stop these jobs only; the rest of the batch keeps running.
    Cancel(Vec<Arc<Job>>),
    /// Run the action applier now and feed its jobs back via
    /// [`SessionCore::resubmit`].
    Apply(PendingRequest),
    /// Stop everything submitted in this session.
    TearDown,
}

#[derive(Debug, Default)]
pub struct SessionStep {
    pub commands: Vec<SessionCommand>,
    pub finished: Option<SessionOutcome>,
}

impl SessionStep {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn run(commands: Vec<SessionCommand>) -> Self {
        Self {
            commands,
            finished: None,
        }
    }

    pub fn finish(outcome: SessionOutcome) -> Self {
        Self {
            commands: Vec::new(),
            finished: Some(outcome),
        }
    }

    /// Tear everything down and end with `outcome`.
    pub fn tear_down(mut commands: Vec<SessionCommand>, outcome: SessionOutcome) -> Self {
        commands.push(SessionCommand::TearDown);
        Self {
            commands,
            finished: Some(outcome),
        }
    }

    pub fn abort(job: &Job, error: JobError) -> Self {
        tracing::error!(job = %job.id(), error = %error, "sub-job failed; aborting session");
        Self::tear_down(
            Vec::new(),
            SessionOutcome::Exception {
                job: job.id(),
                error,
            },
        )
    }
}

/// Per-session notification bookkeeping: only the first action request of
/// a session is honored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotificationCounter {
    received: u32,
    ignored: u32,
}

impl NotificationCounter {
    /// Count one action notification; true only for the first.
    pub fn accept(&mut self) -> bool {
        self.received += 1;
        if self.received == 1 {
            true
        } else {
            self.ignored += 1;
            false
        }
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn ignored(&self) -> u32 {
        self.ignored
    }
}

/// A notification sent before its job was reset belongs to an older run.
pub fn is_stale(notification: &Notification) -> bool {
    let (sender, epoch) = match notification {
        Notification::ActionRequested { sender, epoch, .. } => (sender, *epoch),
        Notification::Terminated { sender, epoch } => (sender, *epoch),
    };
    let stale = sender.restart_count() != epoch;
    if stale {
        debug!(job = %sender.id(), epoch, "stale notification ignored");
    }
    stale
}

pub trait SessionCore: Send {
    /// Initial submission.
    fn start(&mut self) -> SessionStep;

    fn step(&mut self, event: SessionEvent) -> SessionStep;

    /// Jobs returned by an inline [`SessionCommand::Apply`].
    fn resubmit(&mut self, jobs: Vec<Arc<Job>>) -> SessionStep;

    /// The accepted request still to be applied once the session ended.
    fn take_request(&mut self) -> Option<PendingRequest>;

    fn counter(&self) -> NotificationCounter;

    /// Every job submitted so far in this session.
    fn submitted(&self) -> &[Arc<Job>];
}
