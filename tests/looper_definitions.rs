// tests/looper_definitions.rs

mod common;
use crate::common::fakes::{RunLog, ScriptedPerceiver, ScriptedTask};
use crate::common::{init_tracing, with_timeout};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use jobflow::action::{Action, ActionObject, ActionType};
use jobflow::errors::{EngineError, JobError};
use jobflow::job::{
    Evaluation, Job, JobDefinition, JobFactory, JobKind, Looper, OutputValue, PerceiverSpec,
    RunContext,
};
use jobflow::types::{Parameters, keys};

type TestResult = Result<(), Box<dyn Error>>;

fn task_template(task: &str) -> JobDefinition {
    let mut params = Parameters::new();
    params.set("INPUT", "sample-@N@.dat");
    JobDefinition::TaskJob {
        task: task.to_string(),
        params,
        steps: Vec::new(),
    }
}

#[test]
fn looper_substitutes_rules_per_iteration() -> TestResult {
    let log = RunLog::new();
    let (_, task) = ScriptedTask::new("fit", &log).into_job();
    let factory = JobFactory::new().with_task("fit", task);

    let rules = BTreeMap::from([("@N@".to_string(), "${i}".to_string())]);
    let looper = Looper::new(task_template("fit"), 3, rules, factory);

    let job = looper.instantiate(2)?;
    assert_eq!(job.param("INPUT").as_deref(), Some("sample-2.dat"));
    assert_eq!(job.param(keys::JOBLOOPITERATION).as_deref(), Some("2"));
    Ok(())
}

#[tokio::test]
async fn looper_runs_every_iteration_in_order() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (_, task) = ScriptedTask::new("fit", &log).into_job();
    let factory = JobFactory::new().with_task("fit", task.clone());

    let root = factory.build(&JobDefinition::JobLooper {
        template: Box::new(task_template("fit")),
        iterations: 3,
        rules: BTreeMap::from([("@N@".to_string(), "${i}".to_string())]),
        params: Parameters::new(),
    })?;

    with_timeout(Arc::clone(&root).run(RunContext::default())).await;

    assert!(!root.has_exception());
    assert_eq!(task.runs(), 3);
    for i in 0..3 {
        assert_eq!(
            root.output(&format!("iter-{i}")),
            Some(OutputValue::Text("completed".to_string()))
        );
    }
    Ok(())
}

#[tokio::test]
async fn failing_iteration_stops_the_looper() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let (_, task) = ScriptedTask::new("fit", &log).failing().into_job();
    let factory = JobFactory::new().with_task("fit", task.clone());

    let root = factory.build(&JobDefinition::JobLooper {
        template: Box::new(task_template("fit")),
        iterations: 5,
        rules: BTreeMap::new(),
        params: Parameters::new(),
    })?;

    with_timeout(Arc::clone(&root).run(RunContext::default())).await;

    assert!(matches!(root.exception(), Some(JobError::SubJob { .. })));
    assert_eq!(task.runs(), 1);
    Ok(())
}

#[test]
fn unknown_task_is_an_unknown_job_type() {
    let result = JobFactory::new().build(&task_template("missing"));
    assert!(matches!(result, Err(EngineError::UnknownJobType(_))));
}

#[test]
fn unresolved_focus_path_fails_the_build() {
    let result = JobFactory::new().from_json(
        r#"{ "jobType": "Job", "steps": [
              { "jobType": "EvaluationJob", "focus": "-1.4",
                "perceiver": [ { "output": "STDOUT", "pattern": "x",
                                 "situation": { "name": "x" } } ] } ] }"#,
    );
    assert!(matches!(result, Err(EngineError::ConfigError(_))));
}

#[test]
fn definitions_survive_a_build() -> TestResult {
    let text = r#"{
  "jobType": "Job",
  "params": { "NUMTHREADS": "2" },
  "steps": [
    { "jobType": "ShellJob", "params": { "COMMAND": "echo hi", "PARALLELIZABLE": "true" } },
    { "jobType": "MonitoringJob", "focus": "-1.0",
      "perceiver": [ { "output": "STDOUT", "pattern": "hi",
                       "situation": { "name": "greeted" } } ],
      "params": { "PERIOD": "1" } },
    { "jobType": "JobLooper", "iterations": 2,
      "template": { "jobType": "ShellJob", "params": { "COMMAND": "echo ${i}" } },
      "params": { "PARALLELIZABLE": "true" } }
  ]
}"#;
    let definition: JobDefinition = serde_json::from_str(text)?;
    let root = JobFactory::new().build(&definition)?;

    assert_eq!(root.to_definition()?, definition);
    let reparsed: JobDefinition = serde_json::from_str(&root.to_json()?)?;
    assert_eq!(reparsed, definition);
    Ok(())
}

#[test]
fn named_perceivers_come_from_the_factory() -> TestResult {
    let perceiver =
        ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let factory = JobFactory::new().with_perceiver(perceiver);
    assert!(factory.has_perceiver(ScriptedPerceiver::NAME));

    let root = factory.from_json(
        r#"{ "jobType": "Job", "steps": [
              { "jobType": "Job" },
              { "jobType": "EvaluationJob", "focus": "-1.0", "perceiver": "scripted" } ] }"#,
    )?;
    let evaluation = root.get_step(1)?;
    match evaluation.kind() {
        JobKind::Evaluation(e) => {
            assert_eq!(e.perceiver_spec(), &PerceiverSpec::Named("scripted".to_string()));
            let focus = e.focus().ok_or("focus not resolved")?;
            assert_eq!(focus.id(), root.get_step(0)?.id());
        }
        other => panic!("expected an evaluation job, got {other:?}"),
    }
    Ok(())
}

#[test]
fn evaluation_without_focus_path_cannot_be_described() {
    let perceiver =
        ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let job = Job::evaluation(Evaluation::new(perceiver), Parameters::new());
    assert!(matches!(job.to_definition(), Err(EngineError::ConfigError(_))));
}
