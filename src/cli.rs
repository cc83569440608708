// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::{ForceState, SuiteKind};

/// Command-line arguments for `expflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "expflow",
    version,
    about = "Set up, synchronise and schedule numerical weather experiments.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `EXPFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Experiment name. Defaults to the working directory's name.
    #[arg(long, env = "EXP", value_name = "NAME", global = true)]
    pub exp: Option<String>,

    /// Experiment working directory.
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub wd: PathBuf,

    /// Run as stream S (separate progress, lock and lib root).
    #[arg(long, value_name = "S", global = true)]
    pub stream: Option<String>,

    /// Host index whose paths are resolved.
    #[arg(long, value_name = "N", default_value_t = 0, global = true)]
    pub host: usize,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Extra configuration layers on top of the experiment's own files.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Preset from `config/configurations/<NAME>.toml`.
    #[arg(long, value_name = "NAME", global = true)]
    pub preset: Option<String>,

    /// Testbed overlay from `config/testbed/<NAME>`.
    #[arg(long, value_name = "NAME", global = true)]
    pub testbed: Option<String>,

    /// User settings file (TOML or JSON); may be repeated.
    #[arg(long = "config-file", value_name = "PATH", global = true)]
    pub config_files: Vec<PathBuf>,

    /// Single override, e.g. `forecast.length=9`; may be repeated.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub assignments: Vec<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the working tree from a revision and configuration tree.
    Setup {
        #[arg(long, value_name = "DIR")]
        rev: PathBuf,

        /// Configuration tree; defaults to the revision tree.
        #[arg(long, value_name = "DIR")]
        conf: Option<PathBuf>,

        /// Host configuration to link as `Env_*`.
        #[arg(long, value_name = "TAG")]
        host_tag: String,
    },

    /// Mirror the experiment onto its hosts and lock it.
    InitRun,

    /// Build the suite, start the server if needed and install it.
    StartExp {
        #[arg(long, value_enum, default_value = "surfex")]
        suite: SuiteKind,
    },

    /// Move the progress clock forward.
    Advance {
        /// Forecast interval in hours.
        #[arg(long, value_name = "HOURS")]
        fcint: u32,

        /// Advance the post-processing clock instead.
        #[arg(long)]
        pp: bool,
    },

    /// Write the progress window as shell `export` lines.
    ExportProgress {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run a shell command inside a task client (used from job scripts).
    RunTask {
        #[command(flatten)]
        task: TaskArgs,

        /// Command to run.
        #[arg(required = true, trailing_var_arg = true, value_name = "CMD")]
        command: Vec<String>,
    },

    /// Force a task into a terminal state on the server.
    Force {
        #[arg(long, value_enum)]
        state: ForceState,

        /// Node path, e.g. `/exp/2024060100/forecast`.
        #[arg(long, value_name = "PATH")]
        task: String,
    },

    /// Record a batch job id on a task.
    SubmissionId {
        #[arg(long, value_name = "PATH")]
        task: String,

        #[arg(long, value_name = "ID")]
        id: String,
    },
}

/// Child-side task identity, normally taken from the job environment.
#[derive(Debug, Clone, Args)]
pub struct TaskArgs {
    #[arg(long, env = "ECF_HOST")]
    pub ecf_host: String,

    #[arg(long, env = "ECF_PORT")]
    pub ecf_port: u32,

    #[arg(long, env = "ECF_NAME")]
    pub ecf_name: String,

    #[arg(long, env = "ECF_PASS", default_value = "")]
    pub ecf_pass: String,

    #[arg(long, env = "ECF_TRYNO", default_value_t = 1)]
    pub ecf_tryno: u32,

    #[arg(long, env = "ECF_RID")]
    pub ecf_rid: Option<String>,

    /// Seconds to keep retrying `init`/`complete`/`abort`.
    #[arg(long, env = "ECF_TIMEOUT", default_value_t = 20)]
    pub ecf_timeout: u64,

    /// Scheduler log to note aborts in.
    #[arg(long, value_name = "PATH")]
    pub ecf_log: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_task_takes_trailing_command() {
        let args = CliArgs::try_parse_from([
            "expflow",
            "--wd",
            "/w",
            "run-task",
            "--ecf-host",
            "localhost",
            "--ecf-port",
            "3141",
            "--ecf-name",
            "/exp/2024060100/forecast",
            "--",
            "sh",
            "-c",
            "exit 1",
        ])
        .unwrap();
        match args.command {
            Command::RunTask { task, command } => {
                assert_eq!(task.ecf_port, 3141);
                assert_eq!(task.ecf_tryno, 1);
                assert_eq!(command, vec!["sh", "-c", "exit 1"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let args = CliArgs::try_parse_from([
            "expflow",
            "start-exp",
            "--suite",
            "testbed",
            "--stream",
            "2",
            "--set",
            "forecast.length=9",
        ])
        .unwrap();
        assert_eq!(args.stream.as_deref(), Some("2"));
        assert_eq!(args.config.assignments, vec!["forecast.length=9"]);
        assert!(matches!(
            args.command,
            Command::StartExp {
                suite: SuiteKind::Testbed
            }
        ));
    }
}
