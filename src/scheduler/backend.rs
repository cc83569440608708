// src/scheduler/backend.rs

//! Workflow-engine capability.
//!
//! The server façade and the task client talk to a `SchedulerBackend`
//! instead of a concrete engine. Production uses
//! [`EcflowBackend`](super::ecflow::EcflowBackend); tests use
//! [`InMemoryBackend`](super::memory::InMemoryBackend).

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::errors::Result;
use crate::scheduler::task::Task;
use crate::types::ForceState;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub trait SchedulerBackend: Send + Sync {
    /// `Ok` when the engine answers; `ServerUnreachable` otherwise.
    fn ping(&self) -> BackendFuture<'_>;

    /// Launch a local engine on the configured port.
    fn start_server(&self) -> BackendFuture<'_>;

    /// Load `def_file` as `suite_path`, replacing an existing definition.
    /// Fails with `SuiteExists` when the engine refuses because of a
    /// name clash.
    fn replace<'a>(&'a self, suite_path: &'a str, def_file: &'a Path) -> BackendFuture<'a>;

    fn delete<'a>(&'a self, suite_path: &'a str) -> BackendFuture<'a>;

    fn force_state<'a>(&'a self, node_path: &'a str, state: ForceState) -> BackendFuture<'a>;

    fn alter_variable<'a>(
        &'a self,
        node_path: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a>;

    fn child_init<'a>(&'a self, task: &'a Task) -> BackendFuture<'a>;

    fn child_complete<'a>(&'a self, task: &'a Task) -> BackendFuture<'a>;

    fn child_abort<'a>(&'a self, task: &'a Task, reason: &'a str) -> BackendFuture<'a>;
}
