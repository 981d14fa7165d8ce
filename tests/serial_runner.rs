// tests/serial_runner.rs

mod common;
use crate::common::builders::{evaluator, fast_settings, monitor, serial_master};
use crate::common::fakes::{RecordingApplier, RunLog, ScriptedPerceiver, ScriptedTask, task_job};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use jobflow::action::{Action, ActionObject, ActionType};
use jobflow::errors::JobError;
use jobflow::job::{RunContext, keys};
use jobflow::runner::{SerialJobsRunner, SessionOutcome};

type TestResult = Result<(), Box<dyn Error>>;

const WALL: Option<Duration> = Some(Duration::from_secs(10));

#[tokio::test]
async fn steps_run_in_order() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let master = serial_master(vec![
        task_job("A", &log),
        task_job("B", &log),
        task_job("C", &log),
    ]);

    let report = with_timeout(
        SerialJobsRunner::new(Arc::clone(&master), fast_settings(1, WALL), RunContext::default())
            .start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.restarts, 1);
    assert_eq!(log.entries(), vec!["A", "B", "C"]);
    assert!(master.steps().iter().all(|s| s.is_completed()));
    Ok(())
}

#[tokio::test]
async fn stop_request_halts_before_remaining_steps() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let a = task_job("A", &log);
    let b = task_job("B", &log);
    let perceiver = ScriptedPerceiver::always(Action::new(ActionType::Stop, ActionObject::FocusJob));
    let e = evaluator(&b, perceiver);
    let c = task_job("C", &log);
    let master = serial_master(vec![a, Arc::clone(&b), Arc::clone(&e), Arc::clone(&c)]);

    let report = with_timeout(
        SerialJobsRunner::new(Arc::clone(&master), fast_settings(1, WALL), RunContext::default())
            .start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Halted);
    assert_eq!(log.entries(), vec!["A", "B"]);
    assert!(!c.is_started());
    assert!(!c.is_completed());

    // The accepted request is published on the master.
    let recorded = master
        .output(keys::ACTION_REQUEST_BY_SUBJOB)
        .and_then(|v| v.as_action().cloned())
        .ok_or("no action recorded on master")?;
    assert_eq!(recorded.action_type, ActionType::Stop);
    assert_eq!(
        master
            .output(keys::SUBJOB_REQUESTING_ACTION)
            .and_then(|v| v.as_text()),
        Some(e.id().to_string())
    );
    Ok(())
}

#[tokio::test]
async fn redo_reruns_focus_and_following_steps() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let a = task_job("A", &log);
    let (b, b_task) = ScriptedTask::new("B", &log).into_job();
    let perceiver =
        ScriptedPerceiver::requesting(Action::new(ActionType::Redo, ActionObject::FocusJob), 1);
    let e = evaluator(&b, perceiver.clone());
    let c = task_job("C", &log);
    let master = serial_master(vec![a, b, e, c]);

    let applier = RecordingApplier::new();
    let ctx = RunContext::new(Arc::new(applier.clone()));
    let report = with_timeout(
        SerialJobsRunner::new(Arc::clone(&master), fast_settings(1, WALL), ctx).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.restarts, 2);
    assert_eq!(b_task.runs(), 2);
    assert_eq!(perceiver.calls(), 2);
    assert_eq!(log.entries(), vec!["A", "B", "B", "C"]);

    let calls = applier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.action_type, ActionType::Redo);
    assert_eq!(calls[0].1, 1, "applier sees the restart counter of the session");
    Ok(())
}

#[tokio::test]
async fn redo_applies_parameter_details_to_focus() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let b = task_job("B", &log);
    let action = Action::new(ActionType::Redo, ActionObject::FocusJob)
        .with_detail("set:THRESHOLD", "0.001");
    let e = evaluator(&b, ScriptedPerceiver::requesting(action, 1));
    let master = serial_master(vec![Arc::clone(&b), e]);

    let report = with_timeout(
        SerialJobsRunner::new(master, fast_settings(1, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(b.param("THRESHOLD").as_deref(), Some("0.001"));
    assert_eq!(log.count("B"), 2);
    Ok(())
}

#[tokio::test]
async fn parallel_job_object_is_ignored_in_sequence() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let b = task_job("B", &log);
    let perceiver =
        ScriptedPerceiver::always(Action::new(ActionType::Redo, ActionObject::ParallelJob));
    let e = evaluator(&b, perceiver);
    let master = serial_master(vec![Arc::clone(&b), e, task_job("C", &log)]);

    let report = with_timeout(
        SerialJobsRunner::new(master, fast_settings(1, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.restarts, 1);
    assert!(report.applied_actions.is_empty());
    assert_eq!(log.entries(), vec!["B", "C"]);
    Ok(())
}

#[tokio::test]
async fn skip_continues_the_workflow() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let b = task_job("B", &log);
    let perceiver = ScriptedPerceiver::always(Action::new(ActionType::Skip, ActionObject::FocusJob));
    let e = evaluator(&b, perceiver);
    let master = serial_master(vec![Arc::clone(&b), e, task_job("C", &log)]);

    let report = with_timeout(
        SerialJobsRunner::new(master, fast_settings(1, WALL), RunContext::default()).start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(log.entries(), vec!["B", "C"]);
    Ok(())
}

#[tokio::test]
async fn exception_aborts_the_sequence() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (b, _) = ScriptedTask::new("B", &log).failing().into_job();
    let c = task_job("C", &log);
    let master = serial_master(vec![task_job("A", &log), Arc::clone(&b), Arc::clone(&c)]);

    let report = with_timeout(
        SerialJobsRunner::new(master, fast_settings(1, WALL), RunContext::default()).start(),
    )
    .await;

    match report.outcome {
        SessionOutcome::Exception { job, error } => {
            assert_eq!(job, b.id());
            assert!(matches!(error, JobError::Execution { .. }));
        }
        other => panic!("expected exception, got {other:?}"),
    }
    assert!(report.applied_actions.is_empty());
    assert!(!c.is_started());
    Ok(())
}

#[tokio::test]
async fn master_run_surfaces_subjob_exception() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (b, _) = ScriptedTask::new("B", &log).failing().into_job();
    let master = serial_master(vec![b]);

    with_timeout(Arc::clone(&master).run(RunContext::default())).await;

    assert!(master.is_completed());
    assert!(matches!(master.exception(), Some(JobError::SubJob { .. })));
    Ok(())
}

#[tokio::test]
async fn panicking_task_is_an_exception_not_a_stall() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (bad, _) = ScriptedTask::new("bad", &log).panicking().into_job();
    let after = task_job("after", &log);
    let master = serial_master(vec![Arc::clone(&bad), Arc::clone(&after)]);

    // No wall time: without the panic being captured this would never end.
    let report = with_timeout(
        SerialJobsRunner::new(master, fast_settings(1, None), RunContext::default()).start(),
    )
    .await;

    match report.outcome {
        SessionOutcome::Exception { job, error } => {
            assert_eq!(job, bad.id());
            assert!(
                matches!(&error, JobError::Execution { message, .. } if message.contains("scripted panic in bad")),
                "unexpected error {error:?}"
            );
        }
        other => panic!("expected exception, got {other:?}"),
    }
    assert!(bad.is_completed());
    assert!(bad.has_exception());
    assert!(!bad.is_interrupted());
    assert!(!after.is_started());
    Ok(())
}

#[tokio::test]
async fn wall_time_stops_the_sequence() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (slow, _) = ScriptedTask::new("slow", &log)
        .sleeping(Duration::from_secs(30))
        .into_job();
    let after = task_job("after", &log);
    let master = serial_master(vec![Arc::clone(&slow), Arc::clone(&after)]);

    let report = with_timeout(
        SerialJobsRunner::new(
            master,
            fast_settings(1, Some(Duration::from_millis(200))),
            RunContext::default(),
        )
        .start(),
    )
    .await;

    assert_eq!(report.outcome, SessionOutcome::OutOfTime);
    assert!(slow.is_interrupted());
    assert!(!after.is_started());
    Ok(())
}

#[tokio::test]
async fn monitoring_step_in_sequence_is_a_configuration_error() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let a = task_job("A", &log);
    let m = monitor(
        &a,
        ScriptedPerceiver::requesting(Action::new(ActionType::GoOn, ActionObject::FocusJob), 0),
        Duration::from_millis(50),
    );
    let master = serial_master(vec![a, m]);

    let report = with_timeout(
        SerialJobsRunner::new(master, fast_settings(1, WALL), RunContext::default()).start(),
    )
    .await;

    assert!(matches!(
        report.outcome,
        SessionOutcome::Exception {
            error: JobError::Config { .. },
            ..
        }
    ));
    Ok(())
}
