// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod experiment;
pub mod fs;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod scheduler;
pub mod sync;
pub mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cli::{CliArgs, Command, ConfigArgs, TaskArgs};
use crate::config::{Settings, load_settings_file, parse_assignment};
use crate::errors::{ExpError, Result};
use crate::exec::{CommandSpec, ProcessRunner, RealProcessRunner, shell_quote};
use crate::experiment::{Experiment, OpenOptions, WorkingTree};
use crate::logging::EcfLog;
use crate::scheduler::{EcflowBackend, Task, TaskClient, TaskOutcome};
use crate::sync::{SyncEngine, SyncStatus};
use crate::types::Stream;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(RealProcessRunner);
    run_with(args, runner).await
}

/// [`run`] with an explicit process runner.
pub async fn run_with(args: CliArgs, runner: Arc<dyn ProcessRunner>) -> Result<()> {
    let stream = args.stream.clone().map(Stream::new);

    match &args.command {
        Command::Setup { rev, conf, host_tag } => {
            let conf = conf.clone().unwrap_or_else(|| rev.clone());
            WorkingTree::new(&args.wd, rev, conf, stream).setup_files(host_tag)?;
            let exp = open_and_write_config(&args, runner.as_ref()).await?;
            info!(exp = exp.name(), wd = ?exp.wd(), "experiment ready");
            Ok(())
        }
        Command::InitRun => {
            // Last chance before the lock: after it, preset and testbed
            // layers are only seen through the written working-tree copies.
            let exp = open_and_write_config(&args, runner.as_ref()).await?;
            let res = SyncEngine::new(Arc::clone(&runner))
                .run(exp.tree(), exp.system())
                .await;
            match logged(exp.ecf_log(), res)? {
                SyncStatus::AlreadyLocked => {}
                SyncStatus::Synced { commands } => {
                    info!(commands = commands.len(), "experiment synchronised and locked");
                }
            }
            Ok(())
        }
        Command::StartExp { suite } => {
            let exp = open(&args, runner.as_ref()).await?;
            let res = async {
                let def = exp.build_suite(*suite)?;
                let server = exp.server(Arc::new(exp.ecflow_backend(Arc::clone(&runner))));
                server.start_exp(&def, &exp.def_file()).await?;
                server.update_log(&format!("{} started from {}", def.name, exp.progress().dtg_current()))
            }
            .await;
            logged(exp.ecf_log(), res)
        }
        Command::Advance { fcint, pp } => {
            let mut exp = open(&args, runner.as_ref()).await?;
            let res = exp.progress_mut().advance(*fcint, *pp);
            logged(exp.ecf_log(), res)?;
            let progress = exp.progress();
            println!("{}", if *pp { progress.dtg_pp() } else { progress.dtg_current() });
            Ok(())
        }
        Command::ExportProgress { file } => {
            let exp = open(&args, runner.as_ref()).await?;
            exp.progress().export_to_file(file)
        }
        Command::RunTask { task, command } => run_task(task, command, runner).await,
        Command::Force { state, task } => {
            let exp = open(&args, runner.as_ref()).await?;
            let task = Task::new(task.as_str(), 1, "", None, None)?;
            let server = exp.server(Arc::new(exp.ecflow_backend(Arc::clone(&runner))));
            let res = server.force(&task, *state).await;
            logged(exp.ecf_log(), res)
        }
        Command::SubmissionId { task, id } => {
            let exp = open(&args, runner.as_ref()).await?;
            let task = Task::new(task.as_str(), 1, "", None, Some(id.clone()))?;
            let server = exp.server(Arc::new(exp.ecflow_backend(Arc::clone(&runner))));
            let res = server.update_submission_id(&task).await;
            logged(exp.ecf_log(), res)
        }
    }
}

async fn open(args: &CliArgs, runner: &dyn ProcessRunner) -> Result<Experiment> {
    open_with(args, runner, false).await
}

/// Open and write the merged configuration back into `<wd>/config`.
async fn open_and_write_config(args: &CliArgs, runner: &dyn ProcessRunner) -> Result<Experiment> {
    open_with(args, runner, true).await
}

async fn open_with(
    args: &CliArgs,
    runner: &dyn ProcessRunner,
    write_config_files: bool,
) -> Result<Experiment> {
    let name = experiment_name(args.exp.as_deref(), &args.wd)?;
    let opts = OpenOptions {
        stream: args.stream.clone().map(Stream::new),
        host: args.host,
        preset: args.config.preset.clone(),
        testbed: args.config.testbed.clone(),
        user_settings: user_settings(&args.config)?,
        write_config_files,
    };
    Experiment::open(&name, &args.wd, None, None, opts, runner).await
}

/// `--exp`, else the last component of the (absolute) working directory.
pub fn experiment_name(exp: Option<&str>, wd: &Path) -> Result<String> {
    if let Some(name) = exp.filter(|n| !n.trim().is_empty()) {
        return Ok(name.trim().to_string());
    }
    let abs = std::path::absolute(wd)?;
    abs.components()
        .next_back()
        .and_then(|c| c.as_os_str().to_str())
        .filter(|n| !n.is_empty() && *n != "/" && *n != ".")
        .map(str::to_string)
        .ok_or_else(|| {
            ExpError::Setup(format!(
                "cannot derive an experiment name from {}; pass --exp",
                wd.display()
            ))
        })
}

fn user_settings(config: &ConfigArgs) -> Result<Vec<Settings>> {
    let mut layers = Vec::new();
    for file in &config.config_files {
        layers.push(load_settings_file(file)?);
    }
    for assignment in &config.assignments {
        layers.push(parse_assignment(assignment)?);
    }
    Ok(layers)
}

/// Note a failure in the scheduler log before handing it back.
fn logged<T>(log: &EcfLog, res: Result<T>) -> Result<T> {
    if let Err(e) = &res {
        if let Err(log_err) = log.append(&format!("{}: {e}", e.category())) {
            warn!(error = %log_err, path = ?log.path(), "could not write scheduler log");
        }
    }
    res
}

async fn run_task(args: &TaskArgs, command: &[String], runner: Arc<dyn ProcessRunner>) -> Result<()> {
    let task = Task::new(
        args.ecf_name.as_str(),
        args.ecf_tryno,
        args.ecf_pass.as_str(),
        args.ecf_rid.clone(),
        None,
    )?
    .with_timeout(Duration::from_secs(args.ecf_timeout));
    let backend = EcflowBackend::new(args.ecf_host.clone(), args.ecf_port, Arc::clone(&runner));
    let log = args.ecf_log.clone().map(EcfLog::new);

    // A single argument is taken as a complete shell line.
    let line = match command {
        [single] => single.clone(),
        parts => parts
            .iter()
            .map(|part| shell_quote(part))
            .collect::<Vec<_>>()
            .join(" "),
    };
    let client = TaskClient::start(Arc::new(backend), task, log).await?;
    let outcome = client
        .run(async move {
            let out = runner.run(CommandSpec::new(line.clone()).inherit_stdio()).await?;
            if out.success() {
                Ok(())
            } else {
                Err(ExpError::Other(anyhow::anyhow!(
                    "'{line}' exited with {}",
                    out.code
                )))
            }
        })
        .await?;

    match outcome {
        TaskOutcome::Completed => info!("task completed"),
        TaskOutcome::Aborted { reason } => error!(%reason, "task aborted"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_comes_from_flag_or_directory() {
        assert_eq!(experiment_name(Some("exp1"), Path::new("/w")).unwrap(), "exp1");
        assert_eq!(
            experiment_name(None, Path::new("/scratch/my_exp")).unwrap(),
            "my_exp"
        );
        assert!(matches!(
            experiment_name(None, Path::new("/")),
            Err(ExpError::Setup(_))
        ));
    }
}
