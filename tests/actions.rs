// tests/actions.rs

mod common;
use crate::common::builders::{evaluator, parallel_master, serial_master};
use crate::common::fakes::{RunLog, ScriptedPerceiver, task_job};
use crate::common::init_tracing;

use std::error::Error;
use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use jobflow::action::archive::{ARCHIVE_COPY, ARCHIVE_DELETE, ARCHIVE_MOVE};
use jobflow::action::{
    Action, ActionApplier, ActionObject, ActionType, ArchiveRules, ArchivingTask,
    DefaultActionApplier, archive_folder_name,
};
use jobflow::errors::EngineError;
use jobflow::types::keys;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn action_text_parses_type_object_and_details() -> TestResult {
    let text = "\
# rerun with a tighter threshold
TYPE: redo
OBJECT: FocusAndFollowingJobs
DETAILS:
  set:THRESHOLD = 0.001
  unset:SEED = ignored
";
    let action: Action = text.parse()?;

    assert_eq!(action.action_type, ActionType::Redo);
    assert_eq!(action.object, ActionObject::FocusAndFollowingJobs);
    assert_eq!(action.details.get("set:THRESHOLD").map(String::as_str), Some("0.001"));
    assert_eq!(action.details.len(), 2);

    let again: Action = action.to_string().parse()?;
    assert_eq!(again, action);
    Ok(())
}

#[test]
fn action_text_errors_are_format_errors() {
    let missing_object: Result<Action, _> = "TYPE: STOP\n".parse();
    assert!(matches!(missing_object, Err(EngineError::ActionFormat(_))));

    let unknown_type: Result<Action, _> = "TYPE: EXPLODE\nOBJECT: FOCUSJOB\n".parse();
    assert!(matches!(unknown_type, Err(EngineError::ActionFormat(_))));

    let bad_detail: Result<Action, _> = "TYPE: STOP\nOBJECT: FOCUSJOB\nDETAILS:\n  no-equals\n".parse();
    assert!(matches!(bad_detail, Err(EngineError::ActionFormat(_))));
}

#[test]
fn action_serializes_with_uppercase_names() -> TestResult {
    let action = Action::new(ActionType::RedoAfter, ActionObject::ParallelJob);
    let json = serde_json::to_value(&action)?;
    assert_eq!(json["type"], "REDOAFTER");
    assert_eq!(json["object"], "PARALLELJOB");
    Ok(())
}

#[test]
fn serial_redo_returns_focus_and_following_steps() -> TestResult {
    init_tracing();
    let log = RunLog::new();
    let a = task_job("A", &log);
    let b = task_job("B", &log);
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&b, go_on);
    let c = task_job("C", &log);
    let master = serial_master(vec![a, Arc::clone(&b), Arc::clone(&e), Arc::clone(&c)]);

    let redo = Action::new(ActionType::Redo, ActionObject::FocusJob);
    let todo = DefaultActionApplier.apply(&redo, &master, Some(&b), &e, 1)?;
    let ids: Vec<String> = todo.iter().map(|j| j.id().to_string()).collect();
    assert_eq!(ids, vec!["#0.2", "#0.3", "#0.4"]);

    let redo_after = Action::new(ActionType::RedoAfter, ActionObject::FocusJob);
    let todo = DefaultActionApplier.apply(&redo_after, &master, Some(&b), &e, 1)?;
    let ids: Vec<String> = todo.iter().map(|j| j.id().to_string()).collect();
    assert_eq!(ids, vec!["#0.3", "#0.4"]);
    Ok(())
}

#[test]
fn parallel_focus_redo_returns_focus_and_requester() -> TestResult {
    let log = RunLog::new();
    let a = task_job("A", &log);
    let b = task_job("B", &log);
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&a, go_on);
    let master = parallel_master(3, vec![Arc::clone(&a), b, Arc::clone(&e)]);

    let redo = Action::new(ActionType::Redo, ActionObject::FocusJob);
    let todo = DefaultActionApplier.apply(&redo, &master, Some(&a), &e, 1)?;
    assert_eq!(todo.len(), 2);
    assert!(Arc::ptr_eq(&todo[0], &a));
    assert!(Arc::ptr_eq(&todo[1], &e));

    let all = Action::new(ActionType::Redo, ActionObject::ParallelJob);
    assert_eq!(DefaultActionApplier.apply(&all, &master, Some(&a), &e, 1)?.len(), 3);
    Ok(())
}

#[test]
fn non_redo_actions_return_nothing() -> TestResult {
    let log = RunLog::new();
    let a = task_job("A", &log);
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&a, go_on);
    let master = serial_master(vec![Arc::clone(&a), Arc::clone(&e)]);

    for action_type in [ActionType::Stop, ActionType::Skip, ActionType::GoOn, ActionType::Wait] {
        let action = Action::new(action_type, ActionObject::FocusJob);
        assert!(DefaultActionApplier.apply(&action, &master, Some(&a), &e, 1)?.is_empty());
    }

    let unsupported = Action::new(ActionType::Redo, ActionObject::MasterJob);
    assert!(DefaultActionApplier.apply(&unsupported, &master, Some(&a), &e, 1)?.is_empty());
    Ok(())
}

#[test]
fn focus_redo_requires_a_focus_step() {
    let log = RunLog::new();
    let a = task_job("A", &log);
    let stranger = task_job("X", &log);
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&a, go_on);
    let master = serial_master(vec![Arc::clone(&a), Arc::clone(&e)]);
    let redo = Action::new(ActionType::Redo, ActionObject::FocusJob);

    assert!(DefaultActionApplier.apply(&redo, &master, None, &e, 1).is_err());
    assert!(DefaultActionApplier.apply(&redo, &master, Some(&stranger), &e, 1).is_err());
}

#[test]
fn following_jobs_get_parameter_edits() -> TestResult {
    let log = RunLog::new();
    let a = task_job("A", &log);
    let b = task_job("B", &log);
    let c = task_job("C", &log);
    a.set_param("SEED", "1");
    b.set_param("SEED", "1");
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&b, go_on);
    let master = serial_master(vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c), Arc::clone(&e)]);

    let action = Action::new(ActionType::Redo, ActionObject::FocusAndFollowingJobs)
        .with_detail("set:LEVEL", "high")
        .with_detail("unset:SEED", "");
    DefaultActionApplier.apply(&action, &master, Some(&b), &e, 1)?;

    assert_eq!(a.param("LEVEL"), None);
    assert_eq!(a.param("SEED").as_deref(), Some("1"));
    assert_eq!(b.param("LEVEL").as_deref(), Some("high"));
    assert_eq!(b.param("SEED"), None);
    assert_eq!(c.param("LEVEL").as_deref(), Some("high"));
    Ok(())
}

#[test]
fn archive_rules_prefer_keeping_files() -> TestResult {
    let action = Action::new(ActionType::Redo, ActionObject::FocusJob)
        .with_detail(ARCHIVE_MOVE, "*.log, *.out")
        .with_detail(ARCHIVE_COPY, "*.chk")
        .with_detail(ARCHIVE_DELETE, "*.tmp,*.chk");
    let rules = ArchiveRules::from_action(&action)?;

    assert_eq!(rules.classify("run.log"), Some(ArchivingTask::Move));
    assert_eq!(rules.classify("restart.chk"), Some(ArchivingTask::Copy));
    assert_eq!(rules.classify("scratch.tmp"), Some(ArchivingTask::Delete));
    assert_eq!(rules.classify("input.txt"), None);

    let plain = Action::new(ActionType::Redo, ActionObject::FocusJob);
    assert!(ArchiveRules::from_action(&plain)?.is_empty());

    let broken = plain.with_detail(ARCHIVE_MOVE, "[unclosed");
    assert!(matches!(
        ArchiveRules::from_action(&broken),
        Err(EngineError::ConfigError(_))
    ));
    Ok(())
}

#[test]
fn redo_archives_previous_results_of_rerun_jobs() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let work = dir.path();
    fs::create_dir_all(work.join("nested"))?;
    fs::write(work.join("run.log"), "first run")?;
    fs::write(work.join("nested").join("more.log"), "nested")?;
    fs::write(work.join("restart.chk"), "checkpoint")?;
    fs::write(work.join("scratch.tmp"), "junk")?;
    fs::write(work.join("input.txt"), "input")?;

    let log = RunLog::new();
    let a = task_job("A", &log);
    a.set_param(keys::WORKDIR, work.to_string_lossy());
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&a, go_on);
    let master = serial_master(vec![Arc::clone(&a), Arc::clone(&e)]);

    let action = Action::new(ActionType::Redo, ActionObject::FocusJob)
        .with_detail(ARCHIVE_MOVE, "*.log")
        .with_detail(ARCHIVE_COPY, "*.chk")
        .with_detail(ARCHIVE_DELETE, "*.tmp");
    DefaultActionApplier.apply(&action, &master, Some(&a), &e, 2)?;

    let archive = work.join(archive_folder_name(&a.id(), 2));
    assert_eq!(archive.file_name().and_then(|n| n.to_str()), Some("Job_0.1_2"));
    assert_eq!(fs::read_to_string(archive.join("run.log"))?, "first run");
    assert!(archive.join("nested").join("more.log").is_file());
    assert!(archive.join("restart.chk").is_file());

    assert!(!work.join("run.log").exists());
    assert!(!work.join("nested").join("more.log").exists());
    assert!(work.join("restart.chk").is_file());
    assert!(!work.join("scratch.tmp").exists());
    assert!(work.join("input.txt").is_file());
    assert!(!archive.join("input.txt").exists());

    // A second redo for the same restart gets its own folder and leaves the
    // first archive alone.
    fs::write(work.join("run.log"), "second run")?;
    DefaultActionApplier.apply(&action, &master, Some(&a), &e, 2)?;
    assert_eq!(fs::read_to_string(archive.join("run.log"))?, "first run");
    let entries = fs::read_dir(work)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("Job_0.1_2"))
        .count();
    assert_eq!(entries, 2);
    Ok(())
}

#[test]
fn archiving_skips_jobs_without_a_workdir() -> TestResult {
    let log = RunLog::new();
    let a = task_job("A", &log);
    let go_on = ScriptedPerceiver::always(Action::new(ActionType::GoOn, ActionObject::FocusJob));
    let e = evaluator(&a, go_on);
    let master = serial_master(vec![Arc::clone(&a), Arc::clone(&e)]);

    let action = Action::new(ActionType::Redo, ActionObject::FocusJob)
        .with_detail(ARCHIVE_MOVE, "*");
    let rules = ArchiveRules::from_action(&action)?;
    assert_eq!(rules.archive_job(&a, 1)?, None);

    a.set_param(keys::WORKDIR, "/definitely/not/a/jobflow/dir");
    assert_eq!(DefaultActionApplier.apply(&action, &master, Some(&a), &e, 1)?.len(), 2);
    Ok(())
}
