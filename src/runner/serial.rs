// src/runner/serial.rs

//! Serial execution: one step at a time, in order, on a single worker.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::action::{ActionObject, ActionType};
use crate::errors::JobError;
use crate::job::{Job, RunContext};
use crate::runner::listener::Notification;
use crate::runner::session::{
    NotificationCounter, PendingRequest, SessionCommand, SessionCore, SessionEvent,
    SessionOutcome, SessionStep, is_stale,
};
use crate::runner::{JobsRunner, RunnerMode, RunnerReport, RunnerSettings};

/// Runs the steps of a master job strictly in order.
///
/// Only `FOCUSJOB` and `FOCUSANDFOLLOWINGJOBS` actions are honored; an
/// action on any other object (typically `PARALLELJOB`) is logged and
/// ignored.
#[derive(Debug)]
pub struct SerialJobsRunner {
    runner: JobsRunner,
}

impl SerialJobsRunner {
    pub fn new(master: Arc<Job>, settings: RunnerSettings, ctx: RunContext) -> Self {
        Self {
            runner: JobsRunner::new(RunnerMode::Serial, master, settings, ctx),
        }
    }

    pub async fn start(self) -> RunnerReport {
        self.runner.start().await
    }
}

/// Session logic of the serial runner.
#[derive(Debug)]
pub struct SerialSession {
    queue: VecDeque<Arc<Job>>,
    current: Option<Arc<Job>>,
    submitted: Vec<Arc<Job>>,
    request: Option<PendingRequest>,
    counter: NotificationCounter,
}

impl SerialSession {
    pub fn new(todo: Vec<Arc<Job>>) -> Self {
        Self {
            queue: todo.into(),
            current: None,
            submitted: Vec::new(),
            request: None,
            counter: NotificationCounter::default(),
        }
    }

    /// The job currently running, if any.
    pub fn current(&self) -> Option<&Arc<Job>> {
        self.current.as_ref()
    }

    fn submit_next(&mut self) -> SessionStep {
        let Some(job) = self.queue.pop_front() else {
            self.current = None;
            return SessionStep::finish(SessionOutcome::Completed);
        };

        if job.is_monitoring() {
            let error = JobError::config(
                job.id(),
                "monitoring jobs need a parallel runner (NUMTHREADS > 1 and parallelizable steps)",
            );
            return SessionStep::abort(&job, error);
        }

        debug!(job = %job.id(), remaining = self.queue.len(), "submitting next step");
        self.current = Some(Arc::clone(&job));
        self.submitted.push(Arc::clone(&job));
        SessionStep::run(vec![SessionCommand::Submit(vec![job])])
    }

    fn on_action(&mut self, action: crate::action::Action, sender: Arc<Job>) -> SessionStep {
        if !self.counter.accept() {
            debug!(
                job = %sender.id(),
                notifications = self.counter.received(),
                "action request after the first one in this session ignored"
            );
            return SessionStep::idle();
        }

        match action.object {
            ActionObject::FocusJob | ActionObject::FocusAndFollowingJobs => {
                let request = PendingRequest::new(action, sender);
                self.request = Some(request.clone());
                SessionStep::run(vec![SessionCommand::RecordRequest(request)])
            }
            other => {
                let focus = sender
                    .evaluation_part()
                    .and_then(|e| e.focus())
                    .map(|f| f.id().to_string())
                    .unwrap_or_default();
                warn!(
                    action = %action.action_type,
                    object = %other,
                    requester = %sender.id(),
                    focus = %focus,
                    "ignoring action: object not applicable to a sequential workflow"
                );
                SessionStep::idle()
            }
        }
    }

    /// The current job is done; decide what happens next.
    fn after_current(&mut self) -> SessionStep {
        let Some(current) = self.current.take() else {
            return SessionStep::idle();
        };

        if let Some(error) = current.exception() {
            self.request = None;
            return SessionStep::abort(&current, error);
        }

        if let Some(request) = self.request.take() {
            match request.action.action_type {
                ActionType::Redo | ActionType::RedoAfter => {
                    info!(
                        action = %request.action.action_type,
                        requester = %request.requester.id(),
                        "redo requested; restarting workflow"
                    );
                    self.request = Some(request);
                    return SessionStep::tear_down(Vec::new(), SessionOutcome::Restart);
                }
                ActionType::Stop => {
                    info!(
                        requester = %request.requester.id(),
                        skipped = self.queue.len(),
                        "stop requested; remaining steps will not run"
                    );
                    self.request = Some(request);
                    return SessionStep::finish(SessionOutcome::Halted);
                }
                ActionType::Skip | ActionType::GoOn | ActionType::Wait => {
                    debug!(
                        action = %request.action.action_type,
                        requester = %request.requester.id(),
                        "action does not alter a sequential workflow; continuing"
                    );
                }
            }
        }

        self.submit_next()
    }

    fn is_current(&self, job: &Arc<Job>) -> bool {
        self.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, job))
    }
}

impl SessionCore for SerialSession {
    fn start(&mut self) -> SessionStep {
        self.submit_next()
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
                    Notification::Terminated { sender, .. } => {
                        if self.is_current(&sender) {
                            self.after_current()
                        } else {
                            SessionStep::idle()
                        }
                    }
                }
            }
            SessionEvent::Poll => {
                // Killed jobs complete without notifying.
                let killed = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.is_completed() && c.is_interrupted());
                if killed {
                    self.after_current()
                } else {
                    SessionStep::idle()
                }
            }
            SessionEvent::WallTimeElapsed => {
                warn!("wall time elapsed; stopping serial workflow");
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
        for job in jobs.into_iter().rev() {
            self.queue.push_front(job);
        }
        if self.current.is_none() {
            self.submit_next()
        } else {
            SessionStep::idle()
        }
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
