// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the crate returns [`Result`]. Each variant maps
//! to one of the CLI exit codes through [`ExpError::exit_code`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExpError {
    #[error("Missing config file: {0}")]
    MissingConfigFile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unresolved placeholder in '{template}': {remaining}")]
    Template { template: String, remaining: String },

    #[error("Variable {var} not found for host {host}")]
    MissingVariable { var: String, host: usize },

    #[error("Corrupt progress: {0}")]
    ProgressCorrupt(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Scheduler server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("Suite already exists: {0}")]
    SuiteExists(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Sync failed: {0}")]
    Sync(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("A task client is already active in this process")]
    ClientAlreadyActive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExpError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExpError::Setup(_) | ExpError::ClientAlreadyActive | ExpError::Io(_) | ExpError::Other(_) => 1,
            ExpError::Sync(_) => 2,
            ExpError::ServerUnreachable(_) | ExpError::SuiteExists(_) | ExpError::Scheduler(_) => 3,
            ExpError::MissingConfigFile(_)
            | ExpError::Config(_)
            | ExpError::Template { .. }
            | ExpError::MissingVariable { .. }
            | ExpError::ProgressCorrupt(_)
            | ExpError::Schedule(_)
            | ExpError::TomlDe(_)
            | ExpError::TomlSer(_)
            | ExpError::Json(_) => 4,
        }
    }

    /// Short category name printed on the first line of a fatal report.
    pub fn category(&self) -> &'static str {
        match self {
            ExpError::MissingConfigFile(_) => "MissingConfigFile",
            ExpError::Config(_) | ExpError::TomlDe(_) | ExpError::TomlSer(_) | ExpError::Json(_) => {
                "ConfigurationError"
            }
            ExpError::Template { .. } => "TemplateError",
            ExpError::MissingVariable { .. } => "MissingVariable",
            ExpError::ProgressCorrupt(_) => "ProgressCorrupt",
            ExpError::Schedule(_) => "ScheduleError",
            ExpError::ServerUnreachable(_) => "ServerUnreachable",
            ExpError::SuiteExists(_) | ExpError::Scheduler(_) => "SchedulerError",
            ExpError::Sync(_) => "SyncError",
            ExpError::Setup(_) | ExpError::ClientAlreadyActive => "SetupError",
            ExpError::Io(_) | ExpError::Other(_) => "Error",
        }
    }

    /// Transient failures that a task client may retry until its timeout.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExpError::ServerUnreachable(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ExpError>;
