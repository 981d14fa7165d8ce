// src/exec/pool.rs

//! Bounded worker pool for jobs.
//!
//! A pool is a semaphore with `capacity` permits, a FIFO queue of jobs
//! waiting for a permit and a `JoinSet` of running job tasks. Submission
//! never blocks and never drops work. Queued jobs start strictly in
//! submission order as permits free up. Each running job holds its permit
//! until its `run()` returns, so a monitoring job keeps its slot for the
//! whole batch.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, trace, warn};

use crate::job::{Job, JobId, RunContext};

pub struct WorkerPool {
    name: &'static str,
    capacity: usize,
    permits: Arc<Semaphore>,
    queue: VecDeque<(Arc<Job>, RunContext)>,
    tasks: JoinSet<JobId>,
    handles: HashMap<JobId, AbortHandle>,
    submitted: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("queued", &self.queue.len())
            .field("active", &self.handles.len())
            .field("submitted", &self.submitted)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            queue: VecDeque::new(),
            tasks: JoinSet::new(),
            handles: HashMap::new(),
            submitted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of submissions over the pool's lifetime.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Jobs waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.queue.is_empty()
    }

    pub fn submit(&mut self, job: Arc<Job>, ctx: RunContext) {
        let id = job.id();
        self.forget(&id);

        debug!(pool = self.name, job = %id, "job submitted");
        self.queue.push_back((job, ctx));
        self.submitted += 1;
        self.dispatch();
    }

    /// Start queued jobs while permits are available.
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some((job, ctx)) = self.queue.pop_front() else {
                break;
            };

            let id = job.id();
            let task_id = id.clone();
            trace!(pool = self.name, job = %id, "worker acquired slot");
            let handle = self.tasks.spawn(async move {
                let _permit = permit;
                job.run(ctx).await;
                task_id
            });
            self.handles.insert(id, handle);
        }
    }

    /// Drop any queued or running instance of `id`.
    fn forget(&mut self, id: &JobId) {
        self.queue.retain(|(queued, _)| queued.id() != *id);
        if let Some(previous) = self.handles.remove(id) {
            previous.abort();
        }
    }

    /// Stop a single job: interrupt it if it already started, then abort its
    /// worker or take it out of the queue if it never started.
    pub fn cancel(&mut self, job: &Job) {
        if job.is_started() {
            job.stop_job();
        }
        self.forget(&job.id());
    }

    /// Tear down every job this pool knows about.
    pub fn shutdown(&mut self, jobs: &[Arc<Job>]) {
        for job in jobs {
            self.cancel(job);
        }
        self.queue.clear();
        self.tasks.abort_all();
        self.handles.clear();
    }

    /// Reap one finished worker and hand its slot to the next queued job;
    /// pending forever when nothing runs.
    pub async fn join_next(&mut self) -> Option<JobId> {
        if self.tasks.is_empty() {
            return std::future::pending().await;
        }
        let joined = self.tasks.join_next_with_id().await?;
        let task = match &joined {
            Ok((task, _)) => *task,
            Err(e) => e.id(),
        };
        // A resubmitted job has a newer handle under the same id.
        self.handles.retain(|_, handle| handle.id() != task);
        self.dispatch();

        match joined {
            Ok((_, id)) => Some(id),
            Err(e) if e.is_panic() => {
                warn!(pool = self.name, error = %e, "worker panicked outside its job");
                None
            }
            Err(e) => {
                trace!(pool = self.name, error = %e, "worker ended without result");
                None
            }
        }
    }
}
