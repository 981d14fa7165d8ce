// tests/parallel_runner.rs

mod common;
use crate::common::builders::{evaluator, fast_settings, monitor, parallel_master};
use crate::common::fakes::{RunLog, ScriptedPerceiver, ScriptedTask, task_job};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobflow::action::{Action, ActionObject, ActionType};
use jobflow::exec::WorkerPool;
use jobflow::job::{Job, RunContext};
use jobflow::runner::{Capacities, ParallelJobsRunner, SessionOutcome};
use jobflow::types::Parameters;

type TestResult = Result<(), Box<dyn Error>>;

const WALL: Option<Duration> = Some(Duration::from_secs(10));

#[test]
fn capacities_reserve_one_slot_per_monitor() {
    let log = RunLog::new();
    let a = task_job("A", &log);
    let b = task_job("B", &log);
    let perceiver =
        ScriptedPerceiver::requesting(Action::new(ActionType::GoOn, ActionObject::FocusJob), 0);
    let m = monitor(&a, perceiver, Duration::from_millis(50));

    let jobs = vec![a, b, m];
    assert_eq!(
        Capacities::parallel(4, &jobs),
        Capacities {
            ordinary: 2,
            monitors: 1
        }
    );
    assert_eq!(
        Capacities::parallel(2, &jobs),
        Capacities {
            ordinary: 1,
            monitors: 1
        }
    );
    assert_eq!(Capacities::parallel(8, &jobs[..2]).ordinary, 2);
    assert_eq!(Capacities::serial().ordinary, 1);
}

#[tokio::test]
async fn fewer_threads_than_jobs_still_runs_everything() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let jobs: Vec<Arc<Job>> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|label| {
            ScriptedTask::new(label, &log)
                .sleeping(Duration::from_millis(20))
                .into_job()
                .0
        })
        .collect();
    let master = parallel_master(2, jobs);

    let report = with_timeout(
        ParallelJobsRunner::new(Arc::clone(&master), fast_settings(2, WALL), RunContext::default())
            .start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.ordinary_capacity, 2);
    assert_eq!(report.monitor_capacity, 0);
    assert_eq!(report.ordinary_submissions, 5);
    let mut ran = log.entries();
    ran.sort();
    assert_eq!(ran, vec!["A", "B", "C", "D", "E"]);
    assert!(master.steps().iter().all(|s| s.is_completed()));
    Ok(())
}

#[tokio::test]
async fn jobs_run_concurrently() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let jobs: Vec<Arc<Job>> = (0..3)
        .map(|i| {
            ScriptedTask::new(&format!("job-{i}"), &log)
                .sleeping(Duration::from_millis(300))
                .into_job()
                .0
        })
        .collect();
    let master = parallel_master(3, jobs);

    let started = Instant::now();
    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(3, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(
        started.elapsed() < Duration::from_millis(800),
        "three 300ms jobs on three workers took {:?}",
        started.elapsed()
    );
    Ok(())
}

#[tokio::test]
async fn monitor_gets_its_own_slot_and_is_torn_down() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (a, _) = ScriptedTask::new("A", &log)
        .sleeping(Duration::from_millis(300))
        .into_job();
    let perceiver =
        ScriptedPerceiver::requesting(Action::new(ActionType::GoOn, ActionObject::FocusJob), 0);
    let m = monitor(&a, perceiver.clone(), Duration::from_millis(50));
    let master = parallel_master(2, vec![Arc::clone(&a), Arc::clone(&m)]);

    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(2, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.ordinary_capacity, 1);
    assert_eq!(report.monitor_capacity, 1);
    assert_eq!(report.ordinary_submissions, 1);
    assert_eq!(report.monitor_submissions, 1);
    assert!(a.is_completed());
    assert!(m.is_completed(), "monitor completes on its first tick");
    assert!(
        perceiver.calls() >= 2,
        "monitor kept evaluating while A ran (calls = {})",
        perceiver.calls()
    );

    // Torn down with the batch: no further ticks.
    let calls = perceiver.calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(perceiver.calls(), calls);
    Ok(())
}

#[tokio::test]
async fn only_the_first_action_request_is_honored() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (a, _) = ScriptedTask::new("A", &log)
        .sleeping(Duration::from_millis(100))
        .into_job();
    let go_on = Action::new(ActionType::GoOn, ActionObject::FocusJob);
    let e1 = evaluator(&a, ScriptedPerceiver::always(go_on.clone()));
    let e2 = evaluator(&a, ScriptedPerceiver::always(go_on));
    let master = parallel_master(3, vec![a, e1, e2]);

    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(3, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.notifications, 2);
    assert_eq!(report.ignored_notifications, 1);
    Ok(())
}

#[tokio::test]
async fn redo_of_parallel_job_restarts_the_batch() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (a, _) = ScriptedTask::new("A", &log).into_job();
    let perceiver =
        ScriptedPerceiver::requesting(Action::new(ActionType::Redo, ActionObject::ParallelJob), 1);
    let e = evaluator(&a, perceiver.clone());
    let master = parallel_master(2, vec![Arc::clone(&a), e]);

    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(2, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.restarts, 2);
    assert_eq!(report.applied_actions.len(), 1);
    assert_eq!(perceiver.calls(), 2);
    assert!(a.is_completed());
    Ok(())
}

#[tokio::test]
async fn stop_of_parallel_job_halts_the_batch() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (slow, _) = ScriptedTask::new("slow", &log)
        .sleeping(Duration::from_secs(30))
        .into_job();
    let perceiver =
        ScriptedPerceiver::always(Action::new(ActionType::Stop, ActionObject::ParallelJob));
    let e = evaluator(&slow, perceiver);
    let master = parallel_master(2, vec![Arc::clone(&slow), e]);

    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(2, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Halted);
    assert_eq!(report.restarts, 1);
    assert!(slow.is_interrupted());
    Ok(())
}

#[tokio::test]
async fn redo_of_focus_job_is_applied_within_the_batch() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (a, a_task) = ScriptedTask::new("A", &log).into_job();
    let perceiver =
        ScriptedPerceiver::requesting(Action::new(ActionType::Redo, ActionObject::FocusJob), 1);
    let e = evaluator(&a, perceiver.clone());
    let master = parallel_master(2, vec![Arc::clone(&a), Arc::clone(&e)]);

    // One ordinary slot: the evaluator only starts once its focus finished.
    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(1, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.restarts, 1, "no new session for a focus redo");
    assert_eq!(report.ordinary_capacity, 1);
    assert_eq!(report.applied_actions.len(), 1);
    assert_eq!(report.ordinary_submissions, 4);
    assert_eq!(perceiver.calls(), 2);
    assert_eq!(a_task.runs(), 2);
    assert_eq!(log.entries(), vec!["A", "A"]);
    assert!(a.is_completed());
    assert!(e.is_completed());
    Ok(())
}

#[tokio::test]
async fn pool_starts_queued_jobs_in_submission_order() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let mut pool = WorkerPool::new("ordinary", 1);
    let jobs: Vec<Arc<Job>> = ["first", "second", "third"]
        .iter()
        .map(|label| {
            ScriptedTask::new(label, &log)
                .sleeping(Duration::from_millis(10))
                .into_job()
                .0
        })
        .collect();
    // Parenting gives the jobs distinct ids.
    let _master = parallel_master(2, jobs.clone());

    for job in &jobs {
        pool.submit(Arc::clone(job), RunContext::default());
    }
    assert_eq!(pool.queued(), 2);

    for _ in 0..jobs.len() {
        with_timeout(pool.join_next()).await;
    }

    assert!(pool.is_empty());
    assert_eq!(pool.submitted(), 3);
    assert_eq!(log.entries(), vec!["first", "second", "third"]);
    assert!(jobs.iter().all(|j| j.is_completed()));
    Ok(())
}

#[tokio::test]
async fn wall_time_interrupts_the_batch() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let jobs: Vec<Arc<Job>> = (0..2)
        .map(|i| {
            ScriptedTask::new(&format!("slow-{i}"), &log)
                .sleeping(Duration::from_secs(30))
                .into_job()
                .0
        })
        .collect();
    let master = parallel_master(2, jobs);

    let report = with_timeout(
        ParallelJobsRunner::new(
            Arc::clone(&master),
            fast_settings(2, Some(Duration::from_millis(200))),
            RunContext::default(),
        )
        .start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::OutOfTime);
    assert!(master.steps().iter().all(|s| s.is_interrupted()));
    Ok(())
}

#[tokio::test]
async fn batch_of_only_monitors_completes_immediately() -> TestResult {
    init_tracing();
    let focus = Job::plain(Parameters::new());
    let perceiver =
        ScriptedPerceiver::requesting(Action::new(ActionType::GoOn, ActionObject::FocusJob), 0);
    let m = monitor(&focus, perceiver.clone(), Duration::from_millis(10));
    let master = parallel_master(2, vec![m]);

    let report = with_timeout(
        ParallelJobsRunner::new(master, fast_settings(2, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.monitor_submissions, 0);
    assert_eq!(perceiver.calls(), 0);
    Ok(())
}
