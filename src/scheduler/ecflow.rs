// src/scheduler/ecflow.rs

//! ecFlow backend driving the `ecflow_client` command-line tool.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{ExpError, Result};
use crate::exec::{CommandOutput, CommandSpec, ProcessRunner, shell_quote};
use crate::scheduler::backend::{BackendFuture, SchedulerBackend};
use crate::scheduler::task::Task;
use crate::types::ForceState;

const CLIENT: &str = "ecflow_client";
const START_SCRIPT: &str = "ecflow_start.sh";

/// Phrases in `ecflow_client` output that mean the server was not reached.
const UNREACHABLE_MARKERS: &[&str] = &[
    "connection refused",
    "failed to connect",
    "could not connect",
    "timed out",
    "no route to host",
    "host not found",
    "server not responding",
];

pub struct EcflowBackend {
    host: String,
    port: u32,
    runner: Arc<dyn ProcessRunner>,
}

impl EcflowBackend {
    pub fn new(host: impl Into<String>, port: u32, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            host: host.into(),
            port,
            runner,
        }
    }

    fn user_command(&self, args: &[&str]) -> CommandSpec {
        let mut line = format!(
            "{CLIENT} --host={} --port={}",
            shell_quote(&self.host),
            self.port
        );
        for arg in args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        CommandSpec::new(line)
    }

    /// Child commands identify the job through the environment, as an
    /// ecFlow job script would.
    fn child_command(&self, task: &Task, arg: &str) -> CommandSpec {
        CommandSpec::new(format!("{CLIENT} {}", shell_quote(arg)))
            .env("ECF_HOST", &self.host)
            .env("ECF_PORT", self.port.to_string())
            .env("ECF_NAME", task.ecf_name())
            .env("ECF_PASS", task.password())
            .env("ECF_TRYNO", task.try_no().to_string())
            .env("ECF_RID", task.remote_id())
            .env("ECF_TIMEOUT", task.timeout().as_secs().max(1).to_string())
    }

    async fn exec(&self, spec: CommandSpec, what: &str) -> Result<()> {
        let out = self.runner.run(spec).await?;
        if out.success() {
            debug!(what, "ecflow_client ok");
            Ok(())
        } else {
            Err(classify(&out, what))
        }
    }
}

/// Map a failed `ecflow_client` run to an error kind.
pub fn classify(out: &CommandOutput, what: &str) -> ExpError {
    let diag = out.diagnostic();
    let lower = diag.to_lowercase();
    if lower.contains("already exists") {
        ExpError::SuiteExists(format!("{what}: {diag}"))
    } else if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        ExpError::ServerUnreachable(format!("{what}: {diag}"))
    } else {
        ExpError::Scheduler(format!("{what} failed with exit code {}: {diag}", out.code))
    }
}

impl SchedulerBackend for EcflowBackend {
    fn ping(&self) -> BackendFuture<'_> {
        Box::pin(async move {
            let out = self.runner.run(self.user_command(&["--ping"])).await?;
            if out.success() {
                Ok(())
            } else {
                Err(ExpError::ServerUnreachable(format!(
                    "{}:{} did not answer ping: {}",
                    self.host,
                    self.port,
                    out.diagnostic()
                )))
            }
        })
    }

    fn start_server(&self) -> BackendFuture<'_> {
        Box::pin(async move {
            info!(port = self.port, "starting ecFlow server");
            let spec = CommandSpec::new(format!("{START_SCRIPT} -p {}", self.port));
            let out = self.runner.run(spec).await?;
            if out.success() {
                Ok(())
            } else {
                Err(ExpError::ServerUnreachable(format!(
                    "could not start server on port {}: {}",
                    self.port,
                    out.diagnostic()
                )))
            }
        })
    }

    fn replace<'a>(&'a self, suite_path: &'a str, def_file: &'a Path) -> BackendFuture<'a> {
        Box::pin(async move {
            let arg = format!("--replace={suite_path}");
            let file = def_file.to_string_lossy();
            self.exec(self.user_command(&[&arg, &file]), "replace").await
        })
    }

    fn delete<'a>(&'a self, suite_path: &'a str) -> BackendFuture<'a> {
        Box::pin(async move {
            self.exec(
                self.user_command(&["--delete=force", "yes", suite_path]),
                "delete",
            )
            .await
        })
    }

    fn force_state<'a>(&'a self, node_path: &'a str, state: ForceState) -> BackendFuture<'a> {
        Box::pin(async move {
            let arg = format!("--force={}", state.as_str());
            self.exec(self.user_command(&[&arg, node_path]), "force").await
        })
    }

    fn alter_variable<'a>(
        &'a self,
        node_path: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            self.exec(
                self.user_command(&["--alter=add", "variable", name, value, node_path]),
                "alter",
            )
            .await
        })
    }

    fn child_init<'a>(&'a self, task: &'a Task) -> BackendFuture<'a> {
        Box::pin(async move {
            let arg = format!("--init={}", task.remote_id());
            self.exec(self.child_command(task, &arg), "init").await
        })
    }

    fn child_complete<'a>(&'a self, task: &'a Task) -> BackendFuture<'a> {
        Box::pin(async move {
            self.exec(self.child_command(task, "--complete"), "complete")
                .await
        })
    }

    fn child_abort<'a>(&'a self, task: &'a Task, reason: &'a str) -> BackendFuture<'a> {
        Box::pin(async move {
            let arg = format!("--abort={reason}");
            self.exec(self.child_command(task, &arg), "abort").await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn classify_maps_known_failures() {
        assert!(matches!(
            classify(&out(1, "Add Suite failed: A Suite of name 'exp' already exists"), "replace"),
            ExpError::SuiteExists(_)
        ));
        assert!(matches!(
            classify(&out(1, "Client::connect: Connection refused"), "init"),
            ExpError::ServerUnreachable(_)
        ));
        assert!(matches!(
            classify(&out(1, "no such node /exp/x"), "force"),
            ExpError::Scheduler(_)
        ));
    }
}
