// src/runner/mod.rs

//! Runners: execute the steps of a master job and react to action requests.
//!
//! - [`JobsRunner`] is the shared layer: restart loop, wall time, wait step,
//!   and the async shell that drives a session core.
//! - [`serial`] and [`parallel`] provide the two execution strategies and
//!   their pure session logic.
//! - [`session`] holds the types shared by both session cores.
//! - [`listener`] is the observer contract between jobs and runners.

pub mod listener;
pub mod parallel;
pub mod serial;
pub mod session;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::errors::{EngineError, JobError, Result};
use crate::exec::WorkerPool;
use crate::job::{Job, OutputValue, RunContext, keys};
use crate::types::keys as params;

pub use listener::{ChannelListener, JobNotificationListener, Notification};
pub use parallel::{Capacities, ParallelJobsRunner, ParallelSession};
pub use serial::{SerialJobsRunner, SerialSession};
pub use session::{
    NotificationCounter, PendingRequest, SessionCommand, SessionCore, SessionEvent,
    SessionOutcome, SessionStep,
};

/// Wall time, wait step and pool size of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// `None`: unbounded.
    pub walltime: Option<Duration>,
    /// `None`: wake only on notifications.
    pub wait_step: Option<Duration>,
    pub threads: usize,
}

impl RunnerSettings {
    pub const DEFAULT_WALLTIME: Duration = Duration::from_secs(600);
    pub const DEFAULT_WAIT_STEP: Duration = Duration::from_secs(1);

    /// Read `WALLTIME`, `WAITSTEP` (seconds) and `NUMTHREADS` of a master.
    ///
    /// A negative wall time means unbounded; a wait step `<= 0` disables
    /// polling.
    pub fn from_job(master: &Job) -> Result<Self> {
        let parameters = master.params();

        let walltime = match parameters.parsed::<f64>(params::WALLTIME)? {
            None => Some(Self::DEFAULT_WALLTIME),
            Some(secs) if secs < 0.0 => None,
            Some(secs) => Some(seconds(params::WALLTIME, secs)?),
        };
        let wait_step = match parameters.parsed::<f64>(params::WAITSTEP)? {
            None => Some(Self::DEFAULT_WAIT_STEP),
            Some(secs) if secs <= 0.0 => None,
            Some(secs) => Some(seconds(params::WAITSTEP, secs)?),
        };
        let threads = parameters.parsed::<usize>(params::NUMTHREADS)?.unwrap_or(1);
        if threads == 0 {
            return Err(EngineError::ConfigError(format!(
                "{} of job {} must be >= 1",
                params::NUMTHREADS,
                master.id()
            )));
        }

        Ok(Self {
            walltime,
            wait_step,
            threads,
        })
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            walltime: Some(Self::DEFAULT_WALLTIME),
            wait_step: Some(Self::DEFAULT_WAIT_STEP),
            threads: 1,
        }
    }
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| EngineError::ConfigError(format!("invalid {key} '{secs}': {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    Serial,
    Parallel,
}

impl fmt::Display for RunnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerMode::Serial => f.write_str("serial"),
            RunnerMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// What happened during [`JobsRunner::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerReport {
    /// Outcome of the last session.
    pub outcome: SessionOutcome,
    /// Number of sessions started.
    pub restarts: u32,
    /// Highest number of action notifications received in one session.
    pub notifications: u32,
    /// Action notifications dropped because another one came first.
    pub ignored_notifications: u32,
    /// Submissions to the ordinary pool, across sessions.
    pub ordinary_submissions: usize,
    /// Submissions to the monitoring pool, across sessions.
    pub monitor_submissions: usize,
    /// Pool sizes of the last session.
    pub ordinary_capacity: usize,
    pub monitor_capacity: usize,
    /// Actions handed to the applier, in order.
    pub applied_actions: Vec<Action>,
}

impl Default for RunnerReport {
    fn default() -> Self {
        Self {
            outcome: SessionOutcome::Completed,
            restarts: 0,
            notifications: 0,
            ignored_notifications: 0,
            ordinary_submissions: 0,
            monitor_submissions: 0,
            ordinary_capacity: 0,
            monitor_capacity: 0,
            applied_actions: Vec::new(),
        }
    }
}

/// Shared runner layer: owns the restart loop and drives one session core
/// per attempt.
pub struct JobsRunner {
    mode: RunnerMode,
    master: Arc<Job>,
    settings: RunnerSettings,
    ctx: RunContext,
    todo: Vec<Arc<Job>>,
    restart_counter: u32,
    requested_to_start: bool,
    started_at: Option<Instant>,
    report: RunnerReport,
}

impl fmt::Debug for JobsRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobsRunner")
            .field("mode", &self.mode)
            .field("master", &self.master.id())
            .field("settings", &self.settings)
            .field("todo", &self.todo.len())
            .field("restart_counter", &self.restart_counter)
            .finish_non_exhaustive()
    }
}

impl JobsRunner {
    pub fn new(mode: RunnerMode, master: Arc<Job>, settings: RunnerSettings, ctx: RunContext) -> Self {
        let todo = master.steps();
        Self {
            mode,
            master,
            settings,
            ctx,
            todo,
            restart_counter: 0,
            requested_to_start: false,
            started_at: None,
            report: RunnerReport::default(),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        let started = self.started_at?;
        self.settings.walltime.map(|w| started + w)
    }

    /// Single authority on "must kill everything now".
    pub fn run_out_of_time(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// Run sessions until one ends without a restart request or time is up.
    pub async fn start(mut self) -> RunnerReport {
        self.started_at = Some(Instant::now());
        self.requested_to_start = true;
        info!(
            master = %self.master.id(),
            mode = %self.mode,
            steps = self.todo.len(),
            walltime = ?self.settings.walltime,
            "runner starting"
        );

        while self.requested_to_start && !self.run_out_of_time() {
            let (outcome, request) = self.main_iteration().await;
            self.report.outcome = outcome;

            let Some(request) = request else { continue };
            let restart = self.report.outcome == SessionOutcome::Restart;
            if !restart && self.report.outcome != SessionOutcome::Halted {
                continue;
            }

            info!(
                action = %request.action.action_type,
                object = %request.action.object,
                requester = %request.requester.id(),
                restart = self.restart_counter,
                "applying requested action"
            );
            match self.ctx.applier().apply(
                &request.action,
                &self.master,
                request.focus.as_ref(),
                &request.requester,
                self.restart_counter,
            ) {
                Ok(todo) => {
                    self.report.applied_actions.push(request.action);
                    self.todo = todo;
                    self.requested_to_start = restart && !self.todo.is_empty();
                    if restart && self.todo.is_empty() {
                        debug!("applier returned no jobs; nothing to redo");
                        self.report.outcome = SessionOutcome::Completed;
                    }
                }
                Err(e) => {
                    error!(master = %self.master.id(), error = %e, "action could not be applied");
                    self.report.outcome = SessionOutcome::Exception {
                        job: request.requester.id(),
                        error: JobError::config(self.master.id(), e),
                    };
                }
            }
        }

        if self.requested_to_start {
            warn!(master = %self.master.id(), "no time left for another attempt");
            self.report.outcome = SessionOutcome::OutOfTime;
        }
        self.report.restarts = self.restart_counter;

        info!(
            master = %self.master.id(),
            outcome = ?self.report.outcome,
            sessions = self.report.restarts,
            ignored_notifications = self.report.ignored_notifications,
            "runner finished"
        );
        self.report
    }

    /// One attempt: submit, then wait for exception, restart request,
    /// completion, wall time or an external stop.
    async fn main_iteration(&mut self) -> (SessionOutcome, Option<PendingRequest>) {
        self.restart_counter += 1;
        self.requested_to_start = false;

        let todo = std::mem::take(&mut self.todo);
        let (mut core, capacities): (Box<dyn SessionCore>, Capacities) = match self.mode {
            RunnerMode::Serial => (Box::new(SerialSession::new(todo)), Capacities::serial()),
            RunnerMode::Parallel => {
                let capacities = Capacities::parallel(self.settings.threads, &todo);
                (Box::new(ParallelSession::new(todo)), capacities)
            }
        };
        debug!(
            master = %self.master.id(),
            session = self.restart_counter,
            ordinary = capacities.ordinary,
            monitors = capacities.monitors,
            "session starting"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let listener: Arc<dyn JobNotificationListener> = Arc::new(ChannelListener::new(tx));
        let mut pools = Pools {
            ordinary: WorkerPool::new("ordinary", capacities.ordinary),
            monitors: WorkerPool::new("monitor", capacities.monitors),
        };

        let deadline = self.deadline();
        let wall = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(wall);
        let mut poll = self.settings.wait_step.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let master_stop = self.master.cancel_token();

        let mut step = core.start();
        let outcome = loop {
            if let Some(outcome) = self.execute(step, core.as_mut(), &listener, &mut pools) {
                break outcome;
            }

            let event = tokio::select! {
                Some(notification) = rx.recv() => Some(SessionEvent::Notified(notification)),
                _ = &mut wall => Some(SessionEvent::WallTimeElapsed),
                _ = tick(&mut poll) => Some(SessionEvent::Poll),
                _ = master_stop.cancelled() => Some(SessionEvent::MasterStopped),
                Some(_) = pools.ordinary.join_next() => None,
                Some(_) = pools.monitors.join_next() => None,
            };

            step = match event {
                Some(event) => core.step(event),
                None => SessionStep::idle(),
            };
        };

        let counter = core.counter();
        self.report.notifications = self.report.notifications.max(counter.received());
        self.report.ignored_notifications += counter.ignored();
        self.report.ordinary_submissions += pools.ordinary.submitted();
        self.report.monitor_submissions += pools.monitors.submitted();
        self.report.ordinary_capacity = capacities.ordinary;
        self.report.monitor_capacity = capacities.monitors;

        debug!(
            master = %self.master.id(),
            session = self.restart_counter,
            outcome = ?outcome,
            notifications = counter.received(),
            "session finished"
        );
        (outcome, core.take_request())
    }

    /// Carry out the commands of a session step, including follow-up steps
    /// produced by inline action application.
    fn execute(
        &mut self,
        step: SessionStep,
        core: &mut dyn SessionCore,
        listener: &Arc<dyn JobNotificationListener>,
        pools: &mut Pools,
    ) -> Option<SessionOutcome> {
        let mut queue: VecDeque<SessionCommand> = step.commands.into();
        let mut finished = step.finished;

        while let Some(command) = queue.pop_front() {
            match command {
                SessionCommand::Submit(jobs) => {
                    for job in jobs {
                        if job.is_started() {
                            job.reset_run_status();
                        }
                        job.set_listener(Some(Arc::clone(listener)));
                        pools.for_job(&job).submit(job, self.ctx.clone());
                    }
                }
                SessionCommand::RecordRequest(request) => {
                    info!(
                        master = %self.master.id(),
                        action = %request.action.action_type,
                        object = %request.action.object,
                        requester = %request.requester.id(),
                        "action request accepted"
                    );
                    self.master.expose(
                        keys::ACTION_REQUEST_BY_SUBJOB,
                        OutputValue::Action(request.action.clone()),
                    );
                    self.master.expose(
                        keys::SUBJOB_REQUESTING_ACTION,
                        OutputValue::JobRef(request.requester.id()),
                    );
                }
                SessionCommand::Cancel(jobs) => {
                    for job in jobs {
                        pools.for_job(&job).cancel(&job);
                    }
                }
                SessionCommand::Apply(request) => {
                    info!(
                        action = %request.action.action_type,
                        object = %request.action.object,
                        requester = %request.requester.id(),
                        restart = self.restart_counter,
                        "applying requested action within the session"
                    );
                    let next = match self.ctx.applier().apply(
                        &request.action,
                        &self.master,
                        request.focus.as_ref(),
                        &request.requester,
                        self.restart_counter,
                    ) {
                        Ok(jobs) => {
                            self.report.applied_actions.push(request.action.clone());
                            core.resubmit(jobs)
                        }
                        Err(e) => core.step(SessionEvent::ApplierFailed {
                            job: request.requester.id(),
                            message: e.to_string(),
                        }),
                    };
                    queue.extend(next.commands);
                    if next.finished.is_some() {
                        finished = next.finished;
                    }
                }
                SessionCommand::TearDown => {
                    let submitted = core.submitted().to_vec();
                    debug!(jobs = submitted.len(), "tearing down session");
                    for job in &submitted {
                        pools.for_job(job).cancel(job);
                    }
                    pools.ordinary.shutdown(&[]);
                    pools.monitors.shutdown(&[]);
                }
            }
        }

        finished
    }
}

struct Pools {
    ordinary: WorkerPool,
    monitors: WorkerPool,
}

impl Pools {
    fn for_job(&mut self, job: &Job) -> &mut WorkerPool {
        if job.is_monitoring() {
            &mut self.monitors
        } else {
            &mut self.ordinary
        }
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
