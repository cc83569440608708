// src/exec/runner.rs

//! Pluggable process runner.
//!
//! Everything that shells out (rsync, ssh, the scheduler client) goes
//! through a [`ProcessRunner`], so tests can swap in a fake that records
//! command lines instead of spawning processes.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;
use tracing::debug;

use crate::errors::Result;
use crate::exec::command::{CommandOutput, CommandSpec};

pub trait ProcessRunner: Send + Sync {
    /// Run `spec` to completion. A non-zero exit is not an error here;
    /// callers decide from [`CommandOutput::code`].
    fn run(
        &self,
        spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + '_>>;
}

/// Runs commands with `tokio::process` through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealProcessRunner;

impl ProcessRunner for RealProcessRunner {
    fn run(
        &self,
        spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + '_>> {
        Box::pin(async move {
            debug!(cmd = %spec.line, "running command");

            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&spec.line).kill_on_drop(true);
            for (key, value) in &spec.env {
                cmd.env(key, value);
            }
            if let Some(dir) = &spec.cwd {
                cmd.current_dir(dir);
            }

            if spec.inherit_stdio {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                let status = cmd
                    .status()
                    .await
                    .with_context(|| format!("spawning '{}'", spec.line))?;
                let code = status.code().unwrap_or(-1);
                debug!(cmd = %spec.line, exit_code = code, "command exited");
                return Ok(CommandOutput {
                    code,
                    ..CommandOutput::default()
                });
            }

            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            let output = cmd
                .output()
                .await
                .with_context(|| format!("spawning '{}'", spec.line))?;

            let out = CommandOutput {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            for line in out.stderr.lines() {
                debug!(cmd = %spec.line, "stderr: {}", line);
            }
            debug!(cmd = %spec.line, exit_code = out.code, "command exited");
            Ok(out)
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let out = RealProcessRunner
            .run(CommandSpec::new("echo hi; echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn passes_environment() {
        let out = RealProcessRunner
            .run(CommandSpec::new("printf %s \"$ECF_NAME\"").env("ECF_NAME", "/exp/a"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "/exp/a");
    }
}
