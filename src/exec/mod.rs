// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] describes a shell command and its captured output.
//! - [`runner`] provides the `ProcessRunner` trait and the
//!   `tokio::process`-backed `RealProcessRunner`.

pub mod command;
pub mod runner;

pub use command::{CommandOutput, CommandSpec, shell_quote};
pub use runner::{ProcessRunner, RealProcessRunner};
