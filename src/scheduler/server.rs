// src/scheduler/server.rs

//! Control-side façade over a [`SchedulerBackend`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::{ExpError, Result};
use crate::exec::{CommandSpec, ProcessRunner};
use crate::logging::EcfLog;
use crate::scheduler::backend::SchedulerBackend;
use crate::scheduler::suite::SuiteDefinition;
use crate::scheduler::task::Task;
use crate::types::ForceState;

pub const DEFAULT_PORT_OFFSET: u32 = 1500;

#[derive(Debug, Deserialize)]
struct RawServerFile {
    #[serde(rename = "ECF_HOST")]
    host: Option<String>,
    #[serde(rename = "ECF_PORT", default)]
    port: Option<toml::Value>,
    #[serde(rename = "ECF_PORT_OFFSET", default)]
    port_offset: Option<toml::Value>,
}

/// Where the engine lives (`Env_server`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    /// Effective port: `ECF_PORT + ECF_PORT_OFFSET`.
    pub port: u32,
}

impl ServerSettings {
    /// Parse `Env_server`. `default_port` stands in for a missing
    /// `ECF_PORT` (the numeric user id in practice).
    pub fn from_toml_str(text: &str, default_port: u32) -> Result<Self> {
        let raw: RawServerFile = toml::from_str(text)?;
        let host = raw
            .host
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ExpError::Config("Env_server: ECF_HOST is not set".to_string()))?;
        let base = match raw.port {
            Some(v) => as_port(&v, "ECF_PORT")?,
            None => default_port,
        };
        let offset = match raw.port_offset {
            Some(v) => as_port(&v, "ECF_PORT_OFFSET")?,
            None => DEFAULT_PORT_OFFSET,
        };
        Ok(Self {
            host,
            port: base + offset,
        })
    }

    /// Read `Env_server`, asking `id -u` for the default port.
    pub async fn load(path: &Path, runner: &dyn ProcessRunner) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let uid = user_id(runner).await;
        Self::from_toml_str(&text, uid)
    }
}

fn as_port(value: &toml::Value, key: &str) -> Result<u32> {
    let parsed = match value {
        toml::Value::Integer(i) => u32::try_from(*i).ok(),
        toml::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExpError::Config(format!("Env_server: invalid {key} {value}")))
}

/// Numeric user id from `id -u`; 0 when it cannot be determined.
pub async fn user_id(runner: &dyn ProcessRunner) -> u32 {
    match runner.run(CommandSpec::new("id -u")).await {
        Ok(out) if out.success() => out.stdout.trim().parse().unwrap_or_else(|_| {
            warn!(stdout = %out.stdout.trim(), "unexpected `id -u` output; using 0");
            0
        }),
        Ok(out) => {
            warn!(code = out.code, "`id -u` failed; using 0");
            0
        }
        Err(e) => {
            warn!(error = %e, "could not run `id -u`; using 0");
            0
        }
    }
}

pub struct SchedulerServer {
    settings: ServerSettings,
    backend: Arc<dyn SchedulerBackend>,
    log: EcfLog,
}

impl SchedulerServer {
    pub fn new(settings: ServerSettings, backend: Arc<dyn SchedulerBackend>, log: EcfLog) -> Self {
        Self {
            settings,
            backend,
            log,
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn backend(&self) -> Arc<dyn SchedulerBackend> {
        Arc::clone(&self.backend)
    }

    pub fn log(&self) -> &EcfLog {
        &self.log
    }

    /// Make sure an engine is answering, starting one if needed.
    pub async fn start(&self) -> Result<()> {
        match self.backend.ping().await {
            Ok(()) => {
                info!(host = %self.settings.host, port = self.settings.port, "server already running");
                return Ok(());
            }
            Err(e) => {
                info!(error = %e, port = self.settings.port, "server not answering; starting it");
            }
        }
        self.backend.start_server().await?;
        self.backend.ping().await.map_err(|e| {
            ExpError::ServerUnreachable(format!(
                "server {}:{} still unreachable after start: {e}",
                self.settings.host, self.settings.port
            ))
        })
    }

    /// Replace `/<suite_name>` with the definition in `def_file`. A name
    /// clash is resolved by deleting the suite and retrying once.
    pub async fn install(&self, suite_name: &str, def_file: &Path) -> Result<()> {
        let path = format!("/{suite_name}");
        match self.backend.replace(&path, def_file).await {
            Ok(()) => {}
            Err(ExpError::SuiteExists(msg)) => {
                warn!(suite = %path, %msg, "suite exists; deleting and retrying");
                self.backend.delete(&path).await?;
                self.backend.replace(&path, def_file).await?;
            }
            Err(e) => return Err(e),
        }
        info!(suite = %path, def_file = ?def_file, "suite installed");
        Ok(())
    }

    /// Write the definition next to the working tree, start the engine
    /// and install the suite.
    pub async fn start_exp(&self, suite: &SuiteDefinition, def_file: &Path) -> Result<()> {
        suite.write(def_file)?;
        self.start().await?;
        self.install(&suite.name, def_file).await
    }

    pub async fn force_complete(&self, task: &Task) -> Result<()> {
        self.force(task, ForceState::Complete).await
    }

    pub async fn force_aborted(&self, task: &Task) -> Result<()> {
        self.force(task, ForceState::Aborted).await
    }

    pub async fn force(&self, task: &Task, state: ForceState) -> Result<()> {
        debug!(task = %task.ecf_name(), state = state.as_str(), "forcing task state");
        self.backend.force_state(task.ecf_name(), state).await
    }

    /// Store the batch system's job id as `SUBMISSION_ID` on the task.
    pub async fn update_submission_id(&self, task: &Task) -> Result<()> {
        let id = task.submission_id().ok_or_else(|| {
            ExpError::Config(format!("task {} has no submission id", task.ecf_name()))
        })?;
        self.update_log(&format!("{} SUBMISSION_ID={id}", task.ecf_name()))?;
        self.backend
            .alter_variable(task.ecf_name(), "SUBMISSION_ID", id)
            .await
    }

    pub fn update_log(&self, text: &str) -> Result<()> {
        self.log.append(text)
    }
}
