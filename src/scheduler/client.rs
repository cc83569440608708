// src/scheduler/client.rs

//! Child-side task client.
//!
//! A [`TaskClient`] brackets the work of one task: `init` on start, then
//! exactly one of `complete` (work succeeded) or `abort` (work failed,
//! panicked, or a fatal signal arrived). The work's own error is reported to
//! the server and not returned to the caller; the server's state is what
//! counts.

use std::any::{Any, type_name};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, warn};

use crate::errors::{ExpError, Result};
use crate::logging::EcfLog;
use crate::scheduler::backend::{BackendFuture, SchedulerBackend};
use crate::scheduler::signals::SignalListener;
use crate::scheduler::task::Task;

/// Longest abort reason sent to the server.
pub const MAX_REASON_LEN: usize = 512;

const RETRY_DELAY: Duration = Duration::from_millis(500);

static CLIENT_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide "a client exists" flag, released on drop.
struct ActiveGuard;

impl ActiveGuard {
    fn acquire() -> Result<Self> {
        CLIENT_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ActiveGuard)
            .map_err(|_| ExpError::ClientAlreadyActive)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        CLIENT_ACTIVE.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Aborted { reason: String },
}

pub struct TaskClient {
    backend: Arc<dyn SchedulerBackend>,
    task: Task,
    log: Option<EcfLog>,
    signals: SignalListener,
    _guard: ActiveGuard,
}

impl fmt::Debug for TaskClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskClient")
            .field("task", &self.task)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl TaskClient {
    /// Claim the process-wide client slot, install the fatal-signal
    /// handlers and send `init`. A signal arriving from here on aborts the
    /// task once [`run`](Self::run) is called.
    pub async fn start(
        backend: Arc<dyn SchedulerBackend>,
        task: Task,
        log: Option<EcfLog>,
    ) -> Result<Self> {
        let guard = ActiveGuard::acquire()?;
        let signals = SignalListener::install();
        info!(
            task = %task.ecf_name(),
            try_no = task.try_no(),
            rid = %task.remote_id(),
            timeout_s = task.timeout().as_secs(),
            "calling init"
        );
        retry_until(task.timeout(), "init", || backend.child_init(&task)).await?;
        Ok(Self {
            backend,
            task,
            log,
            signals,
            _guard: guard,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Run `work` on its own tokio task, then report its result.
    ///
    /// A panic in `work` is reported as an abort. Returns `Ok` with the
    /// outcome once the server has been told; an error only when the server
    /// could not be reached before the task's timeout.
    pub async fn run<F, T, E>(mut self, work: F) -> Result<TaskOutcome>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + fmt::Debug + Send + 'static,
    {
        let mut work = tokio::spawn(work);

        let failure = tokio::select! {
            joined = &mut work => match joined {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => {
                    error!(task = %self.task.ecf_name(), error = ?e, "task work failed");
                    Some(error_reason(&e))
                }
                Err(join_err) => {
                    error!(task = %self.task.ecf_name(), error = %join_err, "task work panicked");
                    Some(join_reason(join_err))
                }
            },
            Some(num) = self.signals.recv() => Some(signal_reason(num)),
        };
        work.abort();

        let reason = match failure {
            Some(reason) => reason,
            None => {
                let backend = Arc::clone(&self.backend);
                let task = &self.task;
                let signals = &mut self.signals;
                tokio::select! {
                    res = retry_until(task.timeout(), "complete", || backend.child_complete(task)) => {
                        res?;
                        info!(task = %task.ecf_name(), "task complete");
                        return Ok(TaskOutcome::Completed);
                    }
                    Some(num) = signals.recv() => signal_reason(num),
                }
            }
        };

        self.abort(reason).await
    }

    async fn abort(self, reason: String) -> Result<TaskOutcome> {
        let reason = truncate(&reason, MAX_REASON_LEN);
        warn!(task = %self.task.ecf_name(), reason = %reason, "calling abort");
        let backend = Arc::clone(&self.backend);
        let task = &self.task;
        retry_until(task.timeout(), "abort", || backend.child_abort(task, &reason)).await?;
        if let Some(log) = &self.log {
            if let Err(e) = log.append(&format!("{} abort", task.ecf_name())) {
                warn!(error = %e, "could not write scheduler log");
            }
        }
        Ok(TaskOutcome::Aborted { reason })
    }
}

/// Error type, message and the `Debug` rendering (which carries the cause
/// chain for `anyhow` errors).
fn error_reason<E: fmt::Display + fmt::Debug>(e: &E) -> String {
    format!("Aborted with error type {}: {e}\n{e:?}", type_name::<E>())
}

fn join_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("Aborted: {err}");
    }
    format!("Aborted with panic: {}", panic_message(err.into_panic()))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => msg.to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

fn signal_reason(num: i32) -> String {
    format!("Signal handler called with signal {num}")
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Call `op` until it succeeds, fails with a non-transient error, or
/// `limit` has passed.
async fn retry_until<'a, F>(limit: Duration, what: &str, mut op: F) -> Result<()>
where
    F: FnMut() -> BackendFuture<'a>,
{
    let deadline = Instant::now() + limit;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match timeout_at(deadline, op()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) if e.is_transient() => e,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ExpError::ServerUnreachable(format!(
                    "{what}: no answer within {}s",
                    limit.as_secs()
                )));
            }
        };
        let now = Instant::now();
        if now + RETRY_DELAY >= deadline {
            return Err(ExpError::ServerUnreachable(format!(
                "{what}: gave up after {attempt} attempts: {err}"
            )));
        }
        debug!(what, attempt, error = %err, "transient failure; retrying");
        sleep(RETRY_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("aé", 2), "a");
    }

    #[test]
    fn error_reason_names_the_type_and_keeps_the_cause_chain() {
        let err = anyhow::anyhow!("disk full").context("writing forecast output");
        let reason = error_reason(&err);
        assert!(
            reason.starts_with("Aborted with error type anyhow::Error: writing forecast output"),
            "{reason}"
        );
        assert!(reason.contains("disk full"), "{reason}");
    }

    async fn explode(step: u32) -> u32 {
        panic!("exploded at step {step}")
    }

    async fn odd_payload() -> u32 {
        std::panic::panic_any(7_u8)
    }

    #[tokio::test]
    async fn panic_payloads_become_readable_reasons() {
        let err = tokio::spawn(explode(3)).await.unwrap_err();
        assert_eq!(join_reason(err), "Aborted with panic: exploded at step 3");

        let err = tokio::spawn(odd_payload()).await.unwrap_err();
        assert_eq!(join_reason(err), "Aborted with panic: non-string panic payload");
    }
}
