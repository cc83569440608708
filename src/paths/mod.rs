// src/paths/mod.rs

//! Path resolution for experiments.
//!
//! - [`resolver`] expands `@YYYY@`-style and `$NAME` placeholders.
//! - [`system`] holds the per-host variable map from `Env_system`.
//! - [`file_paths`] exposes logical directories built on top of both.

pub mod file_paths;
pub mod resolver;
pub mod system;

pub use file_paths::SystemFilePaths;
pub use resolver::{Env, PathContext, PathResolver, process_env};
pub use system::{HostEntry, HostSystem};
