#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use jobflow::action::{Action, ActionApplier, DefaultActionApplier};
use jobflow::errors::{JobError, Result};
use jobflow::job::{BoxFuture, Job, JobTask, OutputValue, Situation, SituationPerceiver};
use jobflow::types::Parameters;

/// Shared, ordered record of which tasks ran.
#[derive(Debug, Clone, Default)]
pub struct RunLog(Arc<Mutex<Vec<String>>>);

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: impl Into<String>) {
        self.0.lock().unwrap().push(label.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|l| *l == label).count()
    }
}

/// A task that:
/// - records its label in a [`RunLog`] when it starts
/// - optionally sleeps, exposes outputs and/or fails.
#[derive(Debug)]
pub struct ScriptedTask {
    label: String,
    log: RunLog,
    delay: Option<Duration>,
    fail: bool,
    panic: bool,
    outputs: Vec<(String, OutputValue)>,
    runs: AtomicUsize,
}

impl ScriptedTask {
    pub fn new(label: &str, log: &RunLog) -> Self {
        Self {
            label: label.to_string(),
            log: log.clone(),
            delay: None,
            fail: false,
            panic: false,
            outputs: Vec::new(),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Panic instead of returning, like a buggy unit of work.
    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn exposing(mut self, key: &str, value: OutputValue) -> Self {
        self.outputs.push((key.to_string(), value));
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Wrap into a task job; keep the returned task to inspect run counts.
    pub fn into_job(self) -> (Arc<Job>, Arc<ScriptedTask>) {
        let task = Arc::new(self);
        let job = Job::task(task.label.clone(), task.clone(), Parameters::new());
        (job, task)
    }
}

impl JobTask for ScriptedTask {
    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, std::result::Result<(), JobError>> {
        async move {
            self.log.push(self.label.clone());
            self.runs.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            for (key, value) in &self.outputs {
                job.expose(key.clone(), value.clone());
            }
            if self.panic {
                panic!("scripted panic in {}", self.label);
            }
            if self.fail {
                return Err(JobError::execution(job.id(), "scripted failure"));
            }
            Ok(())
        }
        .boxed()
    }
}

/// Shorthand for a scripted task job that does nothing but log.
pub fn task_job(label: &str, log: &RunLog) -> Arc<Job> {
    ScriptedTask::new(label, log).into_job().0
}

/// A perceiver that requests `action` on its first `times` calls and sees
/// nothing afterwards.
#[derive(Debug)]
pub struct ScriptedPerceiver {
    action: Action,
    times: usize,
    calls: AtomicUsize,
}

impl ScriptedPerceiver {
    pub const NAME: &'static str = "scripted";

    pub fn requesting(action: Action, times: usize) -> Arc<Self> {
        Arc::new(Self {
            action,
            times,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(action: Action) -> Arc<Self> {
        Self::requesting(action, usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SituationPerceiver for ScriptedPerceiver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn perceive(&self, _focus: &Job) -> std::result::Result<Option<Situation>, JobError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.times {
            Ok(Some(
                Situation::new("scripted").with_reaction(self.action.clone()),
            ))
        } else {
            Ok(None)
        }
    }
}

/// Applier delegating to [`DefaultActionApplier`] while recording every
/// call as `(action, restart counter)`.
#[derive(Debug, Default, Clone)]
pub struct RecordingApplier {
    calls: Arc<Mutex<Vec<(Action, u32)>>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(Action, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ActionApplier for RecordingApplier {
    fn apply(
        &self,
        action: &Action,
        workflow: &Arc<Job>,
        focus: Option<&Arc<Job>>,
        requester: &Arc<Job>,
        restart: u32,
    ) -> Result<Vec<Arc<Job>>> {
        self.calls.lock().unwrap().push((action.clone(), restart));
        DefaultActionApplier.apply(action, workflow, focus, requester, restart)
    }
}
