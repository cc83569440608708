mod common;
use crate::common::{ExperimentTreeBuilder, init_tracing, open};

use std::error::Error;
use std::fs;
use std::sync::Arc;

use expflow::errors::ExpError;
use expflow::experiment::OpenOptions;
use expflow::scheduler::memory::{Failure, Op};
use expflow::scheduler::{BackendCall, InMemoryBackend, Task, TaskState};
use expflow::types::{ForceState, SuiteKind};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn start_exp_starts_server_and_installs_suite() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().dtg_end("2024060106").build();
    let exp = open(&tree, OpenOptions::default()).await?;
    let backend = InMemoryBackend::new();
    let server = exp.server(Arc::new(backend.clone()));

    let suite = exp.build_suite(SuiteKind::Surfex)?;
    server.start_exp(&suite, &exp.def_file()).await?;

    assert!(backend.is_running());
    assert_eq!(backend.suites(), vec!["/exp1".to_string()]);
    let def = fs::read_to_string(tree.wd.join("exp1.def"))?;
    assert_eq!(def, suite.to_def());
    assert_eq!(
        backend.calls().last(),
        Some(&BackendCall::Replace {
            suite: "/exp1".to_string(),
            def_file: tree.wd.join("exp1.def"),
        })
    );
    Ok(())
}

#[tokio::test]
async fn existing_suite_is_deleted_and_replaced_once() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    let exp = open(&tree, OpenOptions::default()).await?;
    let backend = InMemoryBackend::running();
    backend.fail_next(Op::Replace, Failure::SuiteExists, 1);
    let server = exp.server(Arc::new(backend.clone()));

    let suite = exp.build_suite(SuiteKind::Surfex)?;
    server.start_exp(&suite, &exp.def_file()).await?;

    assert_eq!(backend.count(|c| matches!(c, BackendCall::Delete { .. })), 1);
    assert_eq!(backend.count(|c| matches!(c, BackendCall::Replace { .. })), 1);
    Ok(())
}

#[tokio::test]
async fn other_install_errors_are_fatal() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    let exp = open(&tree, OpenOptions::default()).await?;
    let backend = InMemoryBackend::running();
    backend.fail_next(Op::Replace, Failure::Scheduler, 1);
    let server = exp.server(Arc::new(backend.clone()));

    let suite = exp.build_suite(SuiteKind::Surfex)?;
    let err = server.start_exp(&suite, &exp.def_file()).await.unwrap_err();
    assert!(matches!(err, ExpError::Scheduler(_)), "{err:?}");
    assert_eq!(backend.count(|c| matches!(c, BackendCall::Delete { .. })), 0);
    Ok(())
}

#[tokio::test]
async fn server_that_will_not_start_is_unreachable() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    let exp = open(&tree, OpenOptions::default()).await?;
    let server = exp.server(Arc::new(InMemoryBackend::new().with_broken_start()));

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ExpError::ServerUnreachable(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn housekeeping_forces_state_and_records_submission_id() -> TestResult {
    init_tracing();
    let tree = ExperimentTreeBuilder::new().build();
    let exp = open(&tree, OpenOptions::default()).await?;
    let backend = InMemoryBackend::running();
    let server = exp.server(Arc::new(backend.clone()));

    let path = "/exp1/2024060100/forecast";
    server.force_aborted(&Task::new(path, 1, "", None, None)?).await?;
    assert_eq!(backend.task_state(path), Some(TaskState::Aborted));
    backend.requeue(path)?;
    server.force(&Task::new(path, 1, "", None, None)?, ForceState::Complete).await?;
    assert_eq!(backend.task_state(path), Some(TaskState::Complete));

    let task = Task::new(path, 2, "", None, Some("987654".to_string()))?;
    server.update_submission_id(&task).await?;
    assert_eq!(backend.variable(path, "SUBMISSION_ID").as_deref(), Some("987654"));

    let log = fs::read_to_string(tree.data_root(0).join("ECF.log"))?;
    assert!(log.contains(&format!("{path} SUBMISSION_ID=987654")), "{log}");
    Ok(())
}
