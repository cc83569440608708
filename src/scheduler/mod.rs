// src/scheduler/mod.rs

//! Workflow-engine integration.
//!
//! - [`backend`] is the engine capability trait, implemented by
//!   [`ecflow`] (the `ecflow_client` tool) and [`memory`] (in-process).
//! - [`schedule`] and [`suite`] turn configuration and progress into a suite
//!   definition.
//! - [`server`] is the control-side façade: start, install, force.
//! - [`task`], [`client`] and [`signals`] run inside a task's job.

pub mod backend;
pub mod client;
pub mod ecflow;
pub mod memory;
pub mod schedule;
pub mod server;
pub mod signals;
pub mod suite;
pub mod task;

pub use backend::{BackendFuture, SchedulerBackend};
pub use client::{TaskClient, TaskOutcome};
pub use ecflow::EcflowBackend;
pub use memory::{BackendCall, InMemoryBackend, TaskState};
pub use schedule::ForecastCycleSchedule;
pub use server::{SchedulerServer, ServerSettings};
pub use suite::{Cycle, SuiteBuilder, SuiteDefinition};
pub use task::Task;
