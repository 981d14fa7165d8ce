// src/job/mod.rs

//! Jobs: the nodes of the execution tree.
//!
//! A [`Job`] owns its parameters, an ordered list of child steps, status
//! flags and a bag of exposed output. Jobs are shared as `Arc<Job>` and use
//! interior mutability so that runners, listeners and evaluators can all
//! observe the same node while it runs.
//!
//! Lifecycle:
//! - created directly or by a [`JobFactory`] from a [`JobDefinition`],
//! - parented with [`Job::add_step`], which assigns its id,
//! - executed by [`Job::run`], the only normal path to `completed`,
//! - possibly stopped by [`Job::stop_job`] or reset for another attempt by
//!   [`Job::reset_run_status`].

pub mod definition;
pub mod evaluation;
pub mod id;
pub mod looper;
pub mod output;
pub mod task;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionApplier, DefaultActionApplier};
use crate::errors::{EngineError, JobError, Result};
use crate::exec::{ShellCommand, run_process};
use crate::runner::{
    JobNotificationListener, ParallelJobsRunner, RunnerSettings, SerialJobsRunner, SessionOutcome,
};
use crate::types::{Parameters, keys as params};

pub use definition::{JobDefinition, JobFactory};
pub use evaluation::{
    Evaluation, MatchOutput, MatchRule, MonitorSchedule, PerceiverSpec, Situation,
    SituationPerceiver,
};
pub use id::JobId;
pub use looper::Looper;
pub use output::{ExposedOutput, OutputValue, keys};
pub use task::{BoxFuture, JobTask};

const DEFAULT_MONITOR_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MONITOR_PERIOD: Duration = Duration::from_secs(2);

/// What a job does itself, besides running its steps.
pub enum JobKind {
    /// Nothing: only runs its steps.
    Plain,
    /// A caller-supplied unit of work, registered under `name`.
    Task { name: String, task: Arc<dyn JobTask> },
    /// An external process described by the job's parameters.
    Shell,
    /// One evaluation of a focus job.
    Evaluation(Evaluation),
    /// The same evaluation repeated on a timer for the life of a batch.
    Monitoring(Evaluation),
    /// A job template run a number of times with textual substitutions.
    Looper(Looper),
}

impl JobKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::Plain => "Job",
            JobKind::Task { .. } => "TaskJob",
            JobKind::Shell => "ShellJob",
            JobKind::Evaluation(_) => "EvaluationJob",
            JobKind::Monitoring(_) => "MonitoringJob",
            JobKind::Looper(_) => "JobLooper",
        }
    }
}

impl fmt::Debug for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Task { name, .. } => write!(f, "Task({name})"),
            JobKind::Evaluation(e) => f.debug_tuple("Evaluation").field(e).finish(),
            JobKind::Monitoring(e) => f.debug_tuple("Monitoring").field(e).finish(),
            other => f.write_str(other.type_name()),
        }
    }
}

/// Collaborators handed down the tree while it runs.
#[derive(Clone)]
pub struct RunContext {
    applier: Arc<dyn ActionApplier>,
}

impl RunContext {
    pub fn new(applier: Arc<dyn ActionApplier>) -> Self {
        Self { applier }
    }

    pub fn applier(&self) -> &Arc<dyn ActionApplier> {
        &self.applier
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Arc::new(DefaultActionApplier))
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext").finish_non_exhaustive()
    }
}

pub struct Job {
    kind: JobKind,
    id: RwLock<JobId>,
    params: RwLock<Parameters>,
    steps: RwLock<Vec<Arc<Job>>>,
    next_local_id: AtomicU32,
    started: AtomicBool,
    completed: AtomicBool,
    interrupted: AtomicBool,
    exception: Mutex<Option<JobError>>,
    output: ExposedOutput,
    listener: Mutex<Option<Arc<dyn JobNotificationListener>>>,
    cancel: Mutex<CancellationToken>,
    // Bumped by every reset; a run only finalizes the lifecycle it started.
    epoch: AtomicU32,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("steps", &self.number_of_steps())
            .field("started", &self.is_started())
            .field("completed", &self.is_completed())
            .field("interrupted", &self.is_interrupted())
            .field("exception", &self.exception())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("panicked: {detail}")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl Job {
    pub fn new(kind: JobKind, parameters: Parameters) -> Arc<Job> {
        Arc::new(Job {
            kind,
            id: RwLock::new(JobId::default()),
            params: RwLock::new(parameters),
            steps: RwLock::new(Vec::new()),
            next_local_id: AtomicU32::new(1),
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            exception: Mutex::new(None),
            output: ExposedOutput::default(),
            listener: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            epoch: AtomicU32::new(0),
        })
    }

    pub fn plain(parameters: Parameters) -> Arc<Job> {
        Self::new(JobKind::Plain, parameters)
    }

    pub fn task(name: impl Into<String>, task: Arc<dyn JobTask>, parameters: Parameters) -> Arc<Job> {
        Self::new(
            JobKind::Task {
                name: name.into(),
                task,
            },
            parameters,
        )
    }

    pub fn shell(parameters: Parameters) -> Arc<Job> {
        Self::new(JobKind::Shell, parameters)
    }

    pub fn evaluation(evaluation: Evaluation, parameters: Parameters) -> Arc<Job> {
        Self::new(JobKind::Evaluation(evaluation), parameters)
    }

    pub fn monitoring(evaluation: Evaluation, parameters: Parameters) -> Arc<Job> {
        Self::new(JobKind::Monitoring(evaluation), parameters)
    }

    // ---- identity -------------------------------------------------------

    pub fn id(&self) -> JobId {
        read(&self.id).clone()
    }

    /// Turn this job into root `#number` (ids of all descendants follow).
    pub fn set_root_number(&self, number: u32) {
        self.set_id_recursive(JobId::root(number));
    }

    pub(crate) fn set_id_recursive(&self, id: JobId) {
        for step in read(&self.steps).iter() {
            step.set_id_recursive(step.id().reparented(&id));
        }
        *write(&self.id) = id;
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self.kind, JobKind::Monitoring(_))
    }

    /// Evaluation part of an evaluation or monitoring job.
    pub fn evaluation_part(&self) -> Option<&Evaluation> {
        match &self.kind {
            JobKind::Evaluation(e) | JobKind::Monitoring(e) => Some(e),
            _ => None,
        }
    }

    // ---- parameters -----------------------------------------------------

    pub fn params(&self) -> Parameters {
        read(&self.params).clone()
    }

    pub fn param(&self, key: &str) -> Option<String> {
        read(&self.params).get(key).map(str::to_string)
    }

    pub fn set_param(&self, key: impl Into<String>, value: impl Into<String>) {
        write(&self.params).set(key, value);
    }

    pub fn remove_param(&self, key: &str) -> Option<String> {
        write(&self.params).remove(key)
    }

    /// Whether this job may run in a parallel batch.
    ///
    /// `PARALLELIZABLE` wins; otherwise evaluation and monitoring jobs are
    /// parallelizable and everything else is not.
    pub fn is_parallelizable(&self) -> bool {
        read(&self.params)
            .flag(params::PARALLELIZABLE)
            .unwrap_or(matches!(
                self.kind,
                JobKind::Evaluation(_) | JobKind::Monitoring(_)
            ))
    }

    pub fn set_parallelizable(&self, parallelizable: bool) {
        self.set_param(params::PARALLELIZABLE, parallelizable.to_string());
    }

    /// Thread count for this job's own steps (malformed values count as 1).
    pub fn threads(&self) -> usize {
        read(&self.params)
            .parsed::<usize>(params::NUMTHREADS)
            .ok()
            .flatten()
            .unwrap_or(1)
            .max(1)
    }

    pub fn set_threads(&self, threads: usize) {
        self.set_param(params::NUMTHREADS, threads.to_string());
    }

    /// Steps run in parallel iff there are steps, all of them are
    /// parallelizable, and this job has more than one thread.
    pub fn runs_parallel_subjobs(&self) -> bool {
        let steps = read(&self.steps);
        self.threads() > 1 && !steps.is_empty() && steps.iter().all(|s| s.is_parallelizable())
    }

    pub fn monitor_schedule(&self) -> Result<MonitorSchedule> {
        let parameters = read(&self.params);
        let delay = parameters
            .duration(params::INITIALDELAY, params::INITIALDELAY_UNITS)?
            .unwrap_or(DEFAULT_MONITOR_DELAY);
        let period = parameters
            .duration(params::PERIOD, params::PERIOD_UNITS)?
            .unwrap_or(DEFAULT_MONITOR_PERIOD);
        if period.is_zero() {
            return Err(EngineError::ConfigError(format!(
                "monitoring job {} has a zero period",
                self.id()
            )));
        }
        Ok(MonitorSchedule { delay, period })
    }

    // ---- steps ----------------------------------------------------------

    /// Append `step`, giving it the next local id of this job.
    pub fn add_step(&self, step: Arc<Job>) {
        let local = self.next_local_id.fetch_add(1, Ordering::SeqCst);
        step.set_id_recursive(self.id().child(local));
        write(&self.steps).push(step);
    }

    pub fn steps(&self) -> Vec<Arc<Job>> {
        read(&self.steps).clone()
    }

    pub fn has_steps(&self) -> bool {
        !read(&self.steps).is_empty()
    }

    pub fn number_of_steps(&self) -> usize {
        read(&self.steps).len()
    }

    /// Step `index` (0-based).
    ///
    /// An out-of-range index is [`EngineError::StepOutOfRange`], a
    /// configuration error: callers propagate it with `?` and never fall
    /// back to a default step.
    pub fn get_step(&self, index: usize) -> Result<Arc<Job>> {
        let steps = read(&self.steps);
        steps
            .get(index)
            .cloned()
            .ok_or_else(|| EngineError::StepOutOfRange {
                job: self.id().to_string(),
                index,
                len: steps.len(),
            })
    }

    /// Position of `step` among this job's steps (by identity).
    pub fn step_index(&self, step: &Arc<Job>) -> Option<usize> {
        read(&self.steps).iter().position(|s| Arc::ptr_eq(s, step))
    }

    /// Find the job with `id` in the subtree rooted here.
    pub fn find(self: &Arc<Self>, id: &JobId) -> Option<Arc<Job>> {
        let own = self.id();
        if &own == id {
            return Some(Arc::clone(self));
        }
        if !own.is_ancestor_of(id) {
            return None;
        }
        self.steps().iter().find_map(|step| step.find(id))
    }

    /// Parent of this job, looked up from `root` by id.
    pub fn parent_in(&self, root: &Arc<Job>) -> Option<Arc<Job>> {
        self.id().parent().and_then(|parent| root.find(&parent))
    }

    /// Resolve a relative path (e.g. `-1.2`: one level up, then step 2).
    ///
    /// Returns `Ok(None)` if the path leads outside the tree.
    pub fn navigate(self: &Arc<Self>, root: &Arc<Job>, path: &str) -> Result<Option<Arc<Job>>> {
        let parts = id::parse_path(path)?;
        let Some((&climb, descend)) = parts.split_first() else {
            return Ok(None);
        };

        let mut current = Arc::clone(self);
        for _ in 0..climb.min(0).unsigned_abs() {
            match current.parent_in(root) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
        for &index in descend {
            let Ok(index) = usize::try_from(index) else {
                return Ok(None);
            };
            match current.steps().get(index) {
                Some(step) => current = Arc::clone(step),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    // ---- status ---------------------------------------------------------

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn has_exception(&self) -> bool {
        lock(&self.exception).is_some()
    }

    pub fn exception(&self) -> Option<JobError> {
        lock(&self.exception).clone()
    }

    pub fn set_exception(&self, error: JobError) {
        *lock(&self.exception) = Some(error);
    }

    /// Number of times this job was reset for another attempt.
    pub fn restart_count(&self) -> u32 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn requests_action(&self) -> bool {
        self.output.contains(keys::REQUESTED_ACTION)
    }

    pub fn requested_action(&self) -> Option<Action> {
        self.output
            .get(keys::REQUESTED_ACTION)
            .and_then(|v| v.as_action().cloned())
    }

    // ---- output ---------------------------------------------------------

    pub fn expose(&self, key: impl Into<String>, value: OutputValue) {
        self.output.expose(key, value);
    }

    pub fn output(&self, key: &str) -> Option<OutputValue> {
        self.output.get(key)
    }

    pub fn exposed(&self) -> &ExposedOutput {
        &self.output
    }

    // ---- listener / cancellation ----------------------------------------

    pub fn set_listener(&self, listener: Option<Arc<dyn JobNotificationListener>>) {
        *lock(&self.listener) = listener;
    }

    fn listener(&self) -> Option<Arc<dyn JobNotificationListener>> {
        lock(&self.listener).clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    // ---- lifecycle ------------------------------------------------------

    /// Execute this job: its own unit of work, then its steps, then
    /// finalize status and notify the listener once.
    pub fn run(self: Arc<Self>, ctx: RunContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let token = self.cancel_token();
            self.started.store(true, Ordering::SeqCst);
            debug!(job = %self.id(), kind = self.kind.type_name(), "job started");

            // A panicking unit of work is an exception of this job; the
            // runner must still hear about it.
            let result = tokio::select! {
                res = AssertUnwindSafe(self.execute(&ctx)).catch_unwind() => Some(
                    res.unwrap_or_else(|panic| {
                        Err(JobError::execution(self.id(), panic_message(panic.as_ref())))
                    }),
                ),
                _ = token.cancelled() => None,
            };

            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!(job = %self.id(), "job was reset while finishing; dropping stale result");
                return;
            }

            match result {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    warn!(job = %self.id(), error = %err, "job failed");
                    self.set_exception(err);
                    // A monitor is already completed after its first tick.
                    if self.is_completed() {
                        if let Some(listener) = self.listener() {
                            listener.notify_termination(&self);
                        }
                    }
                }
                None => debug!(job = %self.id(), "job run cancelled"),
            }

            if self.mark_completed() {
                debug!(job = %self.id(), "job completed");
                self.notify();
            }
        })
    }

    async fn execute(self: &Arc<Self>, ctx: &RunContext) -> std::result::Result<(), JobError> {
        match &self.kind {
            JobKind::Plain => {}
            JobKind::Task { task, .. } => task.execute(self).await?,
            JobKind::Shell => self.run_shell().await?,
            JobKind::Evaluation(evaluation) => evaluation.evaluate(self)?,
            JobKind::Monitoring(evaluation) => return self.run_monitor(evaluation).await,
            JobKind::Looper(looper) => looper.run(self, ctx).await?,
        }

        if self.has_steps() {
            self.run_steps(ctx).await?;
        }
        Ok(())
    }

    async fn run_shell(&self) -> std::result::Result<(), JobError> {
        let command = ShellCommand::from_params(&self.params())
            .map_err(|e| JobError::config(self.id(), e))?;
        let output = run_process(&command, self.id().as_str())
            .await
            .map_err(|e| JobError::execution(self.id(), format!("{e:#}")))?;
        self.expose(keys::EXITCODE, OutputValue::Integer(output.exit_code));
        self.expose(keys::STDOUT, OutputValue::Text(output.stdout));
        Ok(())
    }

    async fn run_steps(self: &Arc<Self>, ctx: &RunContext) -> std::result::Result<(), JobError> {
        let settings = RunnerSettings::from_job(self).map_err(|e| JobError::config(self.id(), e))?;

        let report = if self.runs_parallel_subjobs() {
            ParallelJobsRunner::new(Arc::clone(self), settings, ctx.clone())
                .start()
                .await
        } else {
            SerialJobsRunner::new(Arc::clone(self), settings, ctx.clone())
                .start()
                .await
        };

        match report.outcome {
            SessionOutcome::Exception { job, error } => Err(JobError::SubJob {
                master: self.id().to_string(),
                job: job.to_string(),
                cause: error.to_string(),
            }),
            SessionOutcome::OutOfTime | SessionOutcome::Interrupted => {
                self.interrupted.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Evaluate after `delay`, then every `period`, until cancelled.
    ///
    /// The first tick completes the job; later ticks only report action
    /// requests. Ticks run one after the other, so a slow evaluation makes
    /// the ticker skip rather than overlap.
    async fn run_monitor(self: &Arc<Self>, evaluation: &Evaluation) -> std::result::Result<(), JobError> {
        let schedule = self
            .monitor_schedule()
            .map_err(|e| JobError::config(self.id(), e))?;

        tokio::time::sleep(schedule.delay).await;
        let mut ticker = tokio::time::interval(schedule.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.output.remove(keys::REQUESTED_ACTION);
            self.output.remove(keys::SITUATION);

            evaluation.evaluate(self)?;

            if self.mark_completed() {
                self.notify();
            } else if let Some(action) = self.requested_action() {
                if let Some(listener) = self.listener() {
                    listener.react_to_request_of_action(action, self);
                }
            }
        }
    }

    /// Flip `completed` from false to true; true only for the caller that
    /// did it.
    fn mark_completed(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Action request first (if any), then termination.
    fn notify(self: &Arc<Self>) {
        let Some(listener) = self.listener() else {
            return;
        };
        if let Some(action) = self.requested_action() {
            listener.react_to_request_of_action(action, self);
        }
        listener.notify_termination(self);
    }

    /// Interrupt this job and its running steps.
    ///
    /// Marks the job interrupted, cancels its run and force-finalizes it
    /// without notifying the listener. Idempotent once completed (apart from
    /// cancelling the run of a monitor that completed on its first tick).
    pub fn stop_job(&self) {
        if self.is_completed() {
            self.cancel_token().cancel();
            return;
        }

        self.interrupted.store(true, Ordering::SeqCst);
        self.cancel_token().cancel();

        for step in self.steps() {
            if step.is_started() && !step.is_completed() {
                step.stop_job();
            }
        }

        if self.mark_completed() {
            info!(job = %self.id(), "job stopped");
        }
    }

    /// Forget everything about previous runs of this subtree.
    pub fn reset_run_status(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.completed.store(false, Ordering::SeqCst);
        self.interrupted.store(false, Ordering::SeqCst);
        *lock(&self.exception) = None;
        self.output.clear();
        *lock(&self.cancel) = CancellationToken::new();

        for step in self.steps() {
            step.reset_run_status();
        }
    }
}
