// src/experiment/mod.rs

//! The experiment aggregate.
//!
//! [`Experiment::open`] ties a working tree to its host topology, merged
//! configuration, path table, progress clock and server settings.

pub mod files;
pub mod tree;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::{
    Configuration, ConfigurationLoader, LoadOptions, Settings, load_settings_file, merged,
};
use crate::errors::{ExpError, Result};
use crate::exec::ProcessRunner;
use crate::logging::EcfLog;
use crate::paths::system::{JOBOUTDIR, SFX_EXP_DATA, SFX_EXP_LIB};
use crate::paths::{HostSystem, SystemFilePaths, process_env};
use crate::progress::{Progress, ProgressFiles};
use crate::scheduler::{
    EcflowBackend, ForecastCycleSchedule, SchedulerBackend, SchedulerServer, ServerSettings,
    SuiteBuilder, SuiteDefinition,
};
use crate::types::{Stream, SuiteKind, with_stream_suffix};

pub use files::ExpFile;
pub use tree::WorkingTree;

/// Name of the scheduler log inside host 0's data root.
pub const ECF_LOG: &str = "ECF.log";

/// Decomposition block used when `merge_testbed_submit` is not told one.
pub const DEFAULT_DECOMPOSITION: &str = "2D";

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub stream: Option<Stream>,
    /// Host whose paths `paths()` resolves against.
    pub host: usize,
    pub preset: Option<String>,
    pub testbed: Option<String>,
    pub user_settings: Vec<Settings>,
    pub write_config_files: bool,
}

#[derive(Debug)]
pub struct Experiment {
    name: String,
    tree: WorkingTree,
    loader: ConfigurationLoader,
    system: HostSystem,
    paths: SystemFilePaths,
    config: Configuration,
    progress: Progress,
    server: ServerSettings,
    env_submit: Settings,
    domain: Option<Value>,
    ecf_log: EcfLog,
}

impl Experiment {
    /// Open (or start) the experiment in `wd`.
    ///
    /// `rev`/`conf` override the paths recorded in the working tree. The
    /// per-host settings files must already be present (see
    /// [`WorkingTree::setup_files`]), otherwise this is a setup error.
    pub async fn open(
        name: &str,
        wd: &Path,
        rev: Option<PathBuf>,
        conf: Option<PathBuf>,
        opts: OpenOptions,
        runner: &dyn ProcessRunner,
    ) -> Result<Self> {
        let tree = WorkingTree::discover(wd, rev, conf, opts.stream.clone())?;
        tree.scaffold()?;
        tree.check_required()?;
        let locked = tree.is_locked();

        let env = process_env();
        let system = HostSystem::from_file(&tree.path(ExpFile::EnvSystem), name, &env)?
            .with_stream(opts.stream.clone());
        if opts.host >= system.len() {
            return Err(ExpError::Config(format!(
                "host index {} out of range ({} hosts)",
                opts.host,
                system.len()
            )));
        }

        let paths =
            SystemFilePaths::from_input_paths_file(&tree.path(ExpFile::EnvInputPaths), &system, opts.host)?;

        let domain_file = tree.path(ExpFile::Domain);
        let domain: Option<Value> = if domain_file.is_file() {
            Some(serde_json::from_str(&fs::read_to_string(&domain_file)?)?)
        } else {
            None
        };

        let mut user_settings = Vec::with_capacity(opts.user_settings.len() + 1);
        if let Some(d) = &domain {
            let mut layer = Settings::new();
            layer.insert("domain".to_string(), d.clone());
            user_settings.push(layer);
        }
        user_settings.extend(opts.user_settings);

        let loader = ConfigurationLoader::new(tree.rev(), tree.wd());
        let config = loader.load(&LoadOptions {
            preset: opts.preset,
            testbed: opts.testbed,
            user_settings,
            locked,
            write_config_files: opts.write_config_files,
        })?;

        let progress = Progress::load(
            ProgressFiles::new(tree.path(ExpFile::Progress), tree.path(ExpFile::ProgressPp)),
            &config.general()?,
        )?;

        let server = ServerSettings::load(&tree.path(ExpFile::EnvServer), runner).await?;
        let env_submit = load_settings_file(&tree.path(ExpFile::EnvSubmit))?;
        let ecf_log = EcfLog::new(Path::new(&system.get(SFX_EXP_DATA, 0)?).join(ECF_LOG));

        info!(
            exp = name,
            wd = ?tree.wd(),
            stream = ?opts.stream.as_ref().map(|s| s.as_str()),
            locked,
            dtg = %progress.dtg_current(),
            "experiment opened"
        );

        Ok(Self {
            name: name.to_string(),
            tree,
            loader,
            system,
            paths,
            config,
            progress,
            server,
            env_submit,
            domain,
            ecf_log,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &WorkingTree {
        &self.tree
    }

    pub fn wd(&self) -> &Path {
        self.tree.wd()
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.tree.stream()
    }

    pub fn system(&self) -> &HostSystem {
        &self.system
    }

    pub fn paths(&self) -> &SystemFilePaths {
        &self.paths
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }

    pub fn server_settings(&self) -> &ServerSettings {
        &self.server
    }

    pub fn env_submit(&self) -> &Settings {
        &self.env_submit
    }

    pub fn domain(&self) -> Option<&Value> {
        self.domain.as_ref()
    }

    pub fn ecf_log(&self) -> &EcfLog {
        &self.ecf_log
    }

    /// Control-side façade talking to the experiment's server via `backend`.
    pub fn server(&self, backend: Arc<dyn SchedulerBackend>) -> SchedulerServer {
        SchedulerServer::new(self.server.clone(), backend, self.ecf_log.clone())
    }

    /// `ecflow_client` backend for the host/port in `Env_server`.
    pub fn ecflow_backend(&self, runner: Arc<dyn ProcessRunner>) -> EcflowBackend {
        EcflowBackend::new(self.server.host.clone(), self.server.port, runner)
    }

    pub fn checkout(&self, rel: &Path) -> Result<bool> {
        self.tree.checkout(rel)
    }

    pub fn setup_files(&self, host_tag: &str) -> Result<()> {
        self.tree.setup_files(host_tag)
    }

    pub fn is_locked(&self) -> bool {
        self.tree.is_locked()
    }

    pub fn lock(&self) -> Result<()> {
        self.tree.lock()
    }

    /// Merge testbed overlays in order without touching the configuration.
    pub fn merge_testbed_configuration(&self, names: &[&str]) -> Result<Settings> {
        self.loader.merge_testbed_configuration(names)
    }

    /// `Env_submit` with the `decomposition` block of a testbed
    /// submission file laid over it.
    pub fn merge_testbed_submit(&self, file: &Path, decomposition: &str) -> Result<Settings> {
        let testbed = load_settings_file(file)?;
        match testbed.get(decomposition) {
            Some(Value::Object(block)) => Ok(merged(&self.env_submit, block)),
            Some(_) => Err(ExpError::Config(format!(
                "decomposition '{decomposition}' in {} is not a table",
                file.display()
            ))),
            None => Err(ExpError::Config(format!(
                "decomposition '{decomposition}' not found in {}",
                file.display()
            ))),
        }
    }

    /// Suite name on the server: the experiment name plus the stream.
    pub fn suite_name(&self) -> String {
        with_stream_suffix(&self.name, self.stream())
    }

    pub fn def_file(&self) -> PathBuf {
        self.wd().join(format!("{}.def", self.suite_name()))
    }

    pub fn schedule(&self) -> Result<ForecastCycleSchedule> {
        ForecastCycleSchedule::from_configuration(&self.config)
    }

    /// Build the suite for the current progress window.
    pub fn build_suite(&self, kind: SuiteKind) -> Result<SuiteDefinition> {
        let schedule = self.schedule()?;
        let suite_settings = self.config.suite()?;
        let general = self.config.general()?;
        let testbed = self.config.testbed()?;

        let lib = self.system.get(SFX_EXP_LIB, 0)?;
        let data = self.system.get(SFX_EXP_DATA, 0)?;
        let joboutdir = self.system.get(JOBOUTDIR, 0)?;
        let ecf_dir = format!("{lib}/ecf");

        let mut builder = SuiteBuilder::new(self.suite_name(), &schedule, &suite_settings)
            .edit("EXP", self.name.clone())
            .edit("LIB", lib)
            .edit("DATA", data)
            .edit("ECF_HOME", joboutdir)
            .edit("ECF_INCLUDE", ecf_dir.clone())
            .edit("ECF_FILES", ecf_dir)
            .edit("ECF_TRIES", general.ecf_tries.to_string());
        if let Some(stream) = self.stream() {
            builder = builder.edit("STREAM", stream.as_str());
        }

        let suite = builder.build(kind, &self.progress, &testbed.configurations)?;
        debug!(suite = %suite.name, families = suite.nodes.len(), "suite ready");
        Ok(suite)
    }
}
