// src/scheduler/memory.rs

//! In-process scheduler backend.
//!
//! Keeps the server-side task state machine in memory, records every
//! message that reached it and can be scripted to fail. Used by tests and
//! by dry runs that should not touch a real engine.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{ExpError, Result};
use crate::scheduler::backend::{BackendFuture, SchedulerBackend};
use crate::scheduler::task::Task;
use crate::types::ForceState;

/// Server-side state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Submitted,
    Active,
    Complete,
    Aborted,
}

/// A message that reached the in-memory server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Ping,
    StartServer,
    Replace { suite: String, def_file: PathBuf },
    Delete { suite: String },
    Force { path: String, state: ForceState },
    Alter { path: String, name: String, value: String },
    Init { path: String },
    Complete { path: String },
    Abort { path: String, reason: String },
}

/// Operation selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Ping,
    StartServer,
    Replace,
    Delete,
    Force,
    Alter,
    Init,
    Complete,
    Abort,
}

/// Error kind a scripted failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unreachable,
    SuiteExists,
    Scheduler,
}

impl Failure {
    fn to_error(self, op: Op) -> ExpError {
        match self {
            Failure::Unreachable => ExpError::ServerUnreachable(format!("{op:?}: scripted")),
            Failure::SuiteExists => ExpError::SuiteExists(format!("{op:?}: scripted")),
            Failure::Scheduler => ExpError::Scheduler(format!("{op:?}: scripted")),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    /// Starting the server is scripted to leave it down.
    start_is_noop: bool,
    suites: BTreeMap<String, PathBuf>,
    tasks: BTreeMap<String, TaskState>,
    variables: BTreeMap<(String, String), String>,
    calls: Vec<BackendCall>,
    failures: HashMap<Op, Vec<Failure>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    /// Backend whose server is not running until `start_server`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running() -> Self {
        let backend = Self::new();
        backend.lock().running = true;
        backend
    }

    /// `start_server` succeeds but the server stays down.
    pub fn with_broken_start(self) -> Self {
        self.lock().start_is_noop = true;
        self
    }

    /// Make the next `times` calls of `op` fail with `failure`.
    pub fn fail_next(&self, op: Op, failure: Failure, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(failure, times));
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Number of delivered calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn suites(&self) -> Vec<String> {
        self.lock().suites.keys().cloned().collect()
    }

    pub fn task_state(&self, path: &str) -> Option<TaskState> {
        self.lock().tasks.get(path).copied()
    }

    pub fn variable(&self, path: &str, name: &str) -> Option<String> {
        self.lock()
            .variables
            .get(&(path.to_string(), name.to_string()))
            .cloned()
    }

    /// Scheduler-side transitions that no child message drives.
    pub fn submit(&self, path: &str) {
        self.lock()
            .tasks
            .insert(path.to_string(), TaskState::Submitted);
    }

    pub fn requeue(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        match state.tasks.get(path) {
            Some(TaskState::Aborted) | Some(TaskState::Complete) => {
                state.tasks.insert(path.to_string(), TaskState::Queued);
                Ok(())
            }
            other => Err(ExpError::Scheduler(format!(
                "cannot requeue {path} from {other:?}"
            ))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, op: Op, f: impl FnOnce(&mut State) -> Result<BackendCall>) -> Result<()> {
        let mut state = self.lock();
        if let Some(queue) = state.failures.get_mut(&op) {
            if !queue.is_empty() {
                let failure = queue.remove(0);
                debug!(?op, ?failure, "scripted backend failure");
                return Err(failure.to_error(op));
            }
        }
        if !matches!(op, Op::Ping | Op::StartServer) && !state.running {
            return Err(ExpError::ServerUnreachable(format!("{op:?}: server is down")));
        }
        let call = f(&mut state)?;
        debug!(?call, "backend call delivered");
        state.calls.push(call);
        Ok(())
    }

    fn transition(
        state: &mut State,
        path: &str,
        from: &[TaskState],
        to: TaskState,
    ) -> Result<()> {
        let current = state.tasks.get(path).copied().unwrap_or(TaskState::Queued);
        if !from.contains(&current) {
            return Err(ExpError::Scheduler(format!(
                "{path}: cannot go from {current:?} to {to:?}"
            )));
        }
        state.tasks.insert(path.to_string(), to);
        Ok(())
    }
}

impl SchedulerBackend for InMemoryBackend {
    fn ping(&self) -> BackendFuture<'_> {
        Box::pin(async move {
            self.apply(Op::Ping, |s| {
                if s.running {
                    Ok(BackendCall::Ping)
                } else {
                    Err(ExpError::ServerUnreachable("server is down".to_string()))
                }
            })
        })
    }

    fn start_server(&self) -> BackendFuture<'_> {
        Box::pin(async move {
            self.apply(Op::StartServer, |s| {
                if !s.start_is_noop {
                    s.running = true;
                }
                Ok(BackendCall::StartServer)
            })
        })
    }

    fn replace<'a>(&'a self, suite_path: &'a str, def_file: &'a Path) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Replace, |s| {
                s.suites
                    .insert(suite_path.to_string(), def_file.to_path_buf());
                Ok(BackendCall::Replace {
                    suite: suite_path.to_string(),
                    def_file: def_file.to_path_buf(),
                })
            })
        })
    }

    fn delete<'a>(&'a self, suite_path: &'a str) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Delete, |s| {
                s.suites.remove(suite_path);
                let prefix = format!("{suite_path}/");
                s.tasks.retain(|path, _| !path.starts_with(&prefix));
                Ok(BackendCall::Delete {
                    suite: suite_path.to_string(),
                })
            })
        })
    }

    fn force_state<'a>(&'a self, node_path: &'a str, state: ForceState) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Force, |s| {
                let to = match state {
                    ForceState::Complete => TaskState::Complete,
                    ForceState::Aborted => TaskState::Aborted,
                };
                s.tasks.insert(node_path.to_string(), to);
                Ok(BackendCall::Force {
                    path: node_path.to_string(),
                    state,
                })
            })
        })
    }

    fn alter_variable<'a>(
        &'a self,
        node_path: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Alter, |s| {
                s.variables
                    .insert((node_path.to_string(), name.to_string()), value.to_string());
                Ok(BackendCall::Alter {
                    path: node_path.to_string(),
                    name: name.to_string(),
                    value: value.to_string(),
                })
            })
        })
    }

    fn child_init<'a>(&'a self, task: &'a Task) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Init, |s| {
                let path = task.ecf_name();
                Self::transition(
                    s,
                    path,
                    &[TaskState::Queued, TaskState::Submitted],
                    TaskState::Active,
                )?;
                Ok(BackendCall::Init {
                    path: path.to_string(),
                })
            })
        })
    }

    fn child_complete<'a>(&'a self, task: &'a Task) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Complete, |s| {
                let path = task.ecf_name();
                Self::transition(s, path, &[TaskState::Active], TaskState::Complete)?;
                Ok(BackendCall::Complete {
                    path: path.to_string(),
                })
            })
        })
    }

    fn child_abort<'a>(&'a self, task: &'a Task, reason: &'a str) -> BackendFuture<'a> {
        Box::pin(async move {
            self.apply(Op::Abort, |s| {
                let path = task.ecf_name();
                Self::transition(s, path, &[TaskState::Active], TaskState::Aborted)?;
                Ok(BackendCall::Abort {
                    path: path.to_string(),
                    reason: reason.to_string(),
                })
            })
        })
    }
}
