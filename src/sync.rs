// src/sync.rs

//! Replication of an experiment tree onto its hosts before the first run.
//!
//! Commands run one at a time in a fixed order, so the first failing
//! command is the one reported. Nothing is locked unless every step
//! succeeded.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::errors::{ExpError, Result};
use crate::exec::{CommandSpec, ProcessRunner, shell_quote};
use crate::experiment::WorkingTree;
use crate::paths::{HostEntry, HostSystem};

/// Excludes for the revision mirror: VCS metadata and bytecode caches.
const REV_EXCLUDES: &[&str] = &["--exclude=.git", "--exclude=__pycache__", "--exclude='*.pyc'"];
const WD_EXCLUDES: &[&str] = &["--exclude=.git"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The tree was already locked; nothing ran.
    AlreadyLocked,
    /// All commands succeeded and the tree is now locked.
    Synced { commands: Vec<String> },
}

pub struct SyncEngine {
    runner: Arc<dyn ProcessRunner>,
}

impl SyncEngine {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Command lines `run` would execute for `tree`, in order.
    pub fn plan(&self, tree: &WorkingTree, system: &HostSystem) -> Result<Vec<String>> {
        let h0 = system.entry(0)?;
        let lib0 = format!("{}{}", h0.rsync_prefix(), h0.lib_root);
        let mut lines = Vec::new();

        if !same_dir(tree.rev(), tree.wd()) {
            lines.push(mirror(&h0.rsync_cmd, &dir_source(tree.rev()), &lib0, REV_EXCLUDES));
        }
        if !same_dir(tree.wd(), Path::new(&h0.lib_root)) {
            lines.push(mirror(&h0.rsync_cmd, &dir_source(tree.wd()), &lib0, WD_EXCLUDES));
        }

        for host in 1..system.len() {
            let hi = system.entry(host)?;
            lines.push(make_roots(&hi));
            lines.push(format!(
                "{} {lib0}/ {}{}",
                hi.rsync_cmd,
                hi.rsync_prefix(),
                hi.lib_root
            ));
        }
        Ok(lines)
    }

    /// Mirror the tree onto every host, then lock it.
    ///
    /// A locked tree is left alone. Any non-zero exit stops the run with
    /// a sync error and the tree stays unlocked.
    pub async fn run(&self, tree: &WorkingTree, system: &HostSystem) -> Result<SyncStatus> {
        if tree.is_locked() {
            info!(wd = ?tree.wd(), "experiment is locked; skipping sync");
            return Ok(SyncStatus::AlreadyLocked);
        }

        let lines = self.plan(tree, system)?;
        for (step, line) in lines.iter().enumerate() {
            info!(step = step + 1, total = lines.len(), cmd = %line, "sync");
            let out = self.runner.run(CommandSpec::new(line.clone())).await?;
            if !out.success() {
                error!(cmd = %line, exit_code = out.code, stderr = %out.diagnostic(), "sync command failed");
                return Err(ExpError::Sync(format!(
                    "'{line}' exited with {}: {}",
                    out.code,
                    out.diagnostic()
                )));
            }
        }

        tree.lock()?;
        Ok(SyncStatus::Synced { commands: lines })
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}

fn dir_source(dir: &Path) -> String {
    let s = dir.display().to_string();
    format!("{}/", shell_quote(s.trim_end_matches('/')))
}

fn mirror(rsync: &str, src: &str, dst: &str, excludes: &[&str]) -> String {
    format!("{rsync} {src} {dst} {}", excludes.join(" "))
}

fn make_roots(host: &HostEntry) -> String {
    let mkdir = format!("{} {} {}", host.mkdir_cmd, host.data_root, host.lib_root);
    if host.is_remote() {
        format!("{} \"{mkdir}\"", host.ssh_prefix)
    } else {
        mkdir
    }
}
