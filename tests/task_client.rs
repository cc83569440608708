mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use expflow::errors::ExpError;
use expflow::logging::EcfLog;
use expflow::scheduler::memory::{Failure, Op};
use expflow::scheduler::{
    BackendCall, InMemoryBackend, Task, TaskClient, TaskOutcome, TaskState,
};
use tokio::sync::Mutex;

type TestResult = Result<(), Box<dyn Error>>;

const PATH: &str = "/exp1/2024060100/forecast";

/// One client per process: tests in this file take turns.
static SERIAL: Mutex<()> = Mutex::const_new(());

fn task(timeout_s: u64) -> Task {
    Task::new(PATH, 1, "secret", Some("4242".to_string()), None)
        .unwrap()
        .with_timeout(Duration::from_secs(timeout_s))
}

fn count(backend: &InMemoryBackend, f: fn(&BackendCall) -> bool) -> usize {
    backend.count(f)
}

fn is_init(c: &BackendCall) -> bool {
    matches!(c, BackendCall::Init { .. })
}

fn is_complete(c: &BackendCall) -> bool {
    matches!(c, BackendCall::Complete { .. })
}

fn is_abort(c: &BackendCall) -> bool {
    matches!(c, BackendCall::Abort { .. })
}

#[tokio::test]
async fn successful_work_sends_init_then_complete() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();

    let client = TaskClient::start(Arc::new(backend.clone()), task(5), None).await?;
    let outcome = with_timeout(client.run(async { Ok::<_, String>(42) })).await?;

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(count(&backend, is_init), 1);
    assert_eq!(count(&backend, is_complete), 1);
    assert_eq!(count(&backend, is_abort), 0);
    assert_eq!(backend.task_state(PATH), Some(TaskState::Complete));
    Ok(())
}

#[tokio::test]
async fn failing_work_is_reported_as_abort_and_logged() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();
    let dir = tempfile::tempdir()?;
    let log = EcfLog::new(dir.path().join("ECF.log"));

    let client = TaskClient::start(Arc::new(backend.clone()), task(5), Some(log)).await?;
    let outcome = with_timeout(client.run(async { Err::<(), _>("boom") })).await?;

    let TaskOutcome::Aborted { reason } = outcome else {
        panic!("expected an abort, got {outcome:?}");
    };
    assert!(reason.starts_with("Aborted with error type &str: boom"), "{reason}");
    assert_eq!(count(&backend, is_complete), 0);
    assert_eq!(count(&backend, is_abort), 1);
    assert_eq!(backend.task_state(PATH), Some(TaskState::Aborted));

    let text = fs::read_to_string(dir.path().join("ECF.log"))?;
    assert!(text.trim_end().ends_with(&format!("{PATH} abort")), "{text}");
    Ok(())
}

async fn exploding_work() -> Result<(), String> {
    panic!("boom")
}

#[tokio::test]
async fn panicking_work_is_reported_as_abort() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();

    let client = TaskClient::start(Arc::new(backend.clone()), task(5), None).await?;
    let outcome = with_timeout(client.run(exploding_work())).await?;

    assert_eq!(
        outcome,
        TaskOutcome::Aborted {
            reason: "Aborted with panic: boom".to_string()
        }
    );
    assert_eq!(count(&backend, is_init), 1);
    assert_eq!(count(&backend, is_abort), 1);
    assert_eq!(count(&backend, is_complete), 0);
    assert_eq!(backend.task_state(PATH), Some(TaskState::Aborted));
    Ok(())
}

async fn send_sigterm_to_self() -> Result<(), String> {
    let status = tokio::process::Command::new("kill")
        .arg("-TERM")
        .arg(std::process::id().to_string())
        .status()
        .await
        .map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("kill exited with {status}"))
    }
}

#[cfg(unix)]
#[tokio::test]
async fn sigterm_between_start_and_run_still_aborts() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();

    let client = TaskClient::start(Arc::new(backend.clone()), task(5), None).await?;
    send_sigterm_to_self().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = with_timeout(client.run(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<(), String>(())
    }))
    .await?;

    assert_eq!(
        outcome,
        TaskOutcome::Aborted {
            reason: "Signal handler called with signal 15".to_string()
        }
    );
    assert_eq!(count(&backend, is_abort), 1);
    assert_eq!(count(&backend, is_complete), 0);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn sigterm_after_init_aborts_exactly_once() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();

    let client = TaskClient::start(Arc::new(backend.clone()), task(5), None).await?;
    let outcome = with_timeout(client.run(async {
        send_sigterm_to_self().await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<(), String>(())
    }))
    .await?;

    assert_eq!(
        outcome,
        TaskOutcome::Aborted {
            reason: "Signal handler called with signal 15".to_string()
        }
    );
    assert_eq!(count(&backend, is_init), 1);
    assert_eq!(count(&backend, is_abort), 1);
    assert_eq!(count(&backend, is_complete), 0);
    Ok(())
}

#[tokio::test]
async fn transient_init_failures_are_retried() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();
    backend.fail_next(Op::Init, Failure::Unreachable, 2);

    let client = with_timeout(TaskClient::start(Arc::new(backend.clone()), task(5), None)).await?;
    assert_eq!(count(&backend, is_init), 1);
    drop(client);
    // Dropping an unused client sends nothing more.
    assert_eq!(backend.calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_server_times_out_and_frees_the_slot() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let down = InMemoryBackend::new();

    let err = with_timeout(TaskClient::start(Arc::new(down), task(1), None))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpError::ServerUnreachable(_)), "{err:?}");
    assert_eq!(err.exit_code(), 3);

    let up = InMemoryBackend::running();
    let client = TaskClient::start(Arc::new(up), task(5), None).await?;
    drop(client);
    Ok(())
}

#[tokio::test]
async fn only_one_client_per_process() -> TestResult {
    let _serial = SERIAL.lock().await;
    init_tracing();
    let backend = InMemoryBackend::running();

    let first = TaskClient::start(Arc::new(backend.clone()), task(5), None).await?;
    let second = TaskClient::start(Arc::new(backend.clone()), task(5), None).await;
    assert!(matches!(second, Err(ExpError::ClientAlreadyActive)));
    assert_eq!(count(&backend, is_init), 1);
    drop(first);

    let third = TaskClient::start(Arc::new(backend), task(5), None).await;
    assert!(third.is_err(), "task is already active on the server");
    Ok(())
}
