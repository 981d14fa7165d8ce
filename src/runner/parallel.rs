// src/runner/parallel.rs

//! Parallel execution of a batch of independent steps.
//!
//! Ordinary steps run on a bounded pool of `min(threads, jobs) - monitors`
//! workers (at least one). Monitoring jobs get their own pool with one
//! reserved slot each, so they never compete with ordinary work.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::action::{Action, ActionObject, ActionType};
use crate::errors::JobError;
use crate::job::{Job, RunContext};
use crate::runner::listener::Notification;
use crate::runner::session::{
    NotificationCounter, PendingRequest, SessionCommand, SessionCore, SessionEvent,
    SessionOutcome, SessionStep, is_stale,
};
use crate::runner::{JobsRunner, RunnerMode, RunnerReport, RunnerSettings};

#[derive(Debug)]
pub struct ParallelJobsRunner {
    runner: JobsRunner,
}

impl ParallelJobsRunner {
    pub fn new(master: Arc<Job>, settings: RunnerSettings, ctx: RunContext) -> Self {
        Self {
            runner: JobsRunner::new(RunnerMode::Parallel, master, settings, ctx),
        }
    }

    pub async fn start(self) -> RunnerReport {
        self.runner.start().await
    }
}

/// Worker pool sizes for one parallel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacities {
    pub ordinary: usize,
    pub monitors: usize,
}

impl Capacities {
    pub fn serial() -> Self {
        Self {
            ordinary: 1,
            monitors: 0,
        }
    }

    pub fn parallel(threads: usize, jobs: &[Arc<Job>]) -> Self {
        let monitors = jobs.iter().filter(|j| j.is_monitoring()).count();
        let ordinary = threads.min(jobs.len()).saturating_sub(monitors).max(1);
        Self { ordinary, monitors }
    }
}

/// Session logic of the parallel runner.
#[derive(Debug)]
pub struct ParallelSession {
    batch: Vec<Arc<Job>>,
    pending: Vec<Arc<Job>>,
    submitted: Vec<Arc<Job>>,
    request: Option<PendingRequest>,
    counter: NotificationCounter,
}

impl ParallelSession {
    pub fn new(batch: Vec<Arc<Job>>) -> Self {
        Self {
            batch,
            pending: Vec::new(),
            submitted: Vec::new(),
            request: None,
            counter: NotificationCounter::default(),
        }
    }

    /// Ordinary jobs not terminated yet.
    pub fn pending(&self) -> &[Arc<Job>] {
        &self.pending
    }

    fn track(&mut self, job: &Arc<Job>) {
        if !self.submitted.iter().any(|j| Arc::ptr_eq(j, job)) {
            self.submitted.push(Arc::clone(job));
        }
        if !job.is_monitoring() && !self.pending.iter().any(|j| Arc::ptr_eq(j, job)) {
            self.pending.push(Arc::clone(job));
        }
    }

    fn forget(&mut self, jobs: &[Arc<Job>]) {
        self.pending
            .retain(|p| !jobs.iter().any(|j| Arc::ptr_eq(j, p)));
    }

    fn completed_if_idle(&self, commands: Vec<SessionCommand>) -> SessionStep {
        if self.pending.is_empty() {
            debug!("all parallel jobs completed");
            SessionStep::tear_down(commands, SessionOutcome::Completed)
        } else {
            SessionStep::run(commands)
        }
    }

    fn on_action(&mut self, action: Action, sender: Arc<Job>) -> SessionStep {
        if !self.counter.accept() {
            debug!(
                job = %sender.id(),
                notifications = self.counter.received(),
                "action request after the first one in this session ignored"
            );
            return SessionStep::idle();
        }

        let request = PendingRequest::new(action.clone(), Arc::clone(&sender));
        let mut commands = vec![SessionCommand::RecordRequest(request.clone())];

        match (action.object, action.action_type) {
            (ActionObject::ParallelJob, ActionType::Redo | ActionType::RedoAfter) => {
                info!(requester = %sender.id(), "redo of the parallel batch requested");
                self.request = Some(request);
                SessionStep::tear_down(commands, SessionOutcome::Restart)
            }
            (ActionObject::ParallelJob, ActionType::Stop | ActionType::Skip) => {
                info!(
                    action = %action.action_type,
                    requester = %sender.id(),
                    "parallel batch halted on request"
                );
                self.request = Some(request);
                SessionStep::tear_down(commands, SessionOutcome::Halted)
            }
            (
                ActionObject::FocusJob | ActionObject::FocusAndFollowingJobs,
                ActionType::Redo | ActionType::RedoAfter | ActionType::Stop | ActionType::Skip,
            ) => {
                let mut cancel = Vec::new();
                if let Some(focus) = &request.focus {
                    cancel.push(Arc::clone(focus));
                }
                cancel.push(Arc::clone(&sender));
                self.forget(&cancel);

                info!(
                    action = %action.action_type,
                    requester = %sender.id(),
                    focus = ?request.focus.as_ref().map(|f| f.id()),
                    "cancelling focus job and evaluator; applying action within the batch"
                );
                commands.push(SessionCommand::Cancel(cancel));
                commands.push(SessionCommand::Apply(request));
                SessionStep::run(commands)
            }
            (_, ActionType::GoOn | ActionType::Wait) => SessionStep::run(commands),
            (other, action_type) => {
                warn!(
                    action = %action_type,
                    object = %other,
                    requester = %sender.id(),
                    "ignoring action: object not applicable to a parallel batch"
                );
                SessionStep::run(commands)
            }
        }
    }

    fn on_terminated(&mut self, sender: Arc<Job>) -> SessionStep {
        if let Some(error) = sender.exception() {
            return SessionStep::abort(&sender, error);
        }
        if sender.is_monitoring() {
            debug!(job = %sender.id(), "monitor completed its first tick");
            return SessionStep::idle();
        }

        let before = self.pending.len();
        self.forget(std::slice::from_ref(&sender));
        if self.pending.len() == before {
            return SessionStep::idle();
        }
        self.completed_if_idle(Vec::new())
    }
}

impl SessionCore for ParallelSession {
    fn start(&mut self) -> SessionStep {
        if self.batch.iter().all(|j| j.is_monitoring()) {
            debug!("no ordinary jobs in parallel batch; nothing to run");
            return SessionStep::finish(SessionOutcome::Completed);
        }

        let batch = std::mem::take(&mut self.batch);
        for job in &batch {
            self.track(job);
        }
        SessionStep::run(vec![SessionCommand::Submit(batch)])
    }

    fn step(&mut self, event: SessionEvent) -> SessionStep {
        match event {
            SessionEvent::Notified(notification) => {
                if is_stale(&notification) {
                    return SessionStep::idle();
                }
                match notification {
                    Notification::ActionRequested { action, sender, .. } => {
                        self.on_action(action, sender)
                    }
                    Notification::Terminated { sender, .. } => self.on_terminated(sender),
                }
            }
            SessionEvent::Poll => {
                if let Some(failed) = self
                    .pending
                    .iter()
                    .find(|p| p.is_completed() && p.has_exception())
                    .cloned()
                {
                    let error = failed.exception().unwrap_or_else(|| {
                        JobError::execution(failed.id(), "unknown failure")
                    });
                    return SessionStep::abort(&failed, error);
                }

                // Killed jobs complete without notifying.
                let before = self.pending.len();
                self.pending
                    .retain(|p| !(p.is_completed() && p.is_interrupted()));
                if self.pending.len() == before {
                    SessionStep::idle()
                } else {
                    self.completed_if_idle(Vec::new())
                }
            }
            SessionEvent::WallTimeElapsed => {
                warn!(pending = self.pending.len(), "wall time elapsed; stopping parallel batch");
                SessionStep::tear_down(Vec::new(), SessionOutcome::OutOfTime)
            }
            SessionEvent::MasterStopped => {
                SessionStep::tear_down(Vec::new(), SessionOutcome::Interrupted)
            }
            SessionEvent::ApplierFailed { job, message } => SessionStep::tear_down(
                Vec::new(),
                SessionOutcome::Exception {
                    error: JobError::config(&job, message),
                    job,
                },
            ),
        }
    }

    fn resubmit(&mut self, jobs: Vec<Arc<Job>>) -> SessionStep {
        for job in &jobs {
            self.track(job);
        }
        let commands = if jobs.is_empty() {
            Vec::new()
        } else {
            vec![SessionCommand::Submit(jobs)]
        };
        self.completed_if_idle(commands)
    }

    fn take_request(&mut self) -> Option<PendingRequest> {
        self.request.take()
    }

    fn counter(&self) -> NotificationCounter {
        self.counter
    }

    fn submitted(&self) -> &[Arc<Job>] {
        &self.submitted
    }
}
