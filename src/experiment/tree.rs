// src/experiment/tree.rs

//! The on-disk experiment working tree and its relation to the revision
//! and configuration trees.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::RawConfigIndex;
use crate::config::{CONFIG_INDEX, ConfigIndex};
use crate::errors::{ExpError, Result};
use crate::experiment::files::ExpFile;
use crate::fs::{copy_if_absent, copy_tree_if_absent, symlink_if_absent, write_atomic};
use crate::types::Stream;

#[derive(Debug, Clone)]
pub struct WorkingTree {
    wd: PathBuf,
    rev: PathBuf,
    conf: PathBuf,
    stream: Option<Stream>,
}

impl WorkingTree {
    pub fn new(
        wd: impl Into<PathBuf>,
        rev: impl Into<PathBuf>,
        conf: impl Into<PathBuf>,
        stream: Option<Stream>,
    ) -> Self {
        Self {
            wd: wd.into(),
            rev: rev.into(),
            conf: conf.into(),
            stream,
        }
    }

    /// Tree for `wd`, with `rev`/`conf` taken from the arguments or else
    /// from the `rev`/`conf` files. `conf` falls back to `rev`.
    pub fn discover(
        wd: &Path,
        rev: Option<PathBuf>,
        conf: Option<PathBuf>,
        stream: Option<Stream>,
    ) -> Result<Self> {
        let rev = match rev {
            Some(r) => r,
            None => read_pointer(wd, ExpFile::Rev)?.ok_or_else(|| {
                ExpError::Setup(format!(
                    "no revision directory given and {} is missing",
                    ExpFile::Rev.path(wd, None).display()
                ))
            })?,
        };
        let conf = match conf {
            Some(c) => c,
            None => read_pointer(wd, ExpFile::Conf)?.unwrap_or_else(|| rev.clone()),
        };
        Ok(Self::new(wd, rev, conf, stream))
    }

    pub fn wd(&self) -> &Path {
        &self.wd
    }

    pub fn rev(&self) -> &Path {
        &self.rev
    }

    pub fn conf(&self) -> &Path {
        &self.conf
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    pub fn path(&self, file: ExpFile) -> PathBuf {
        file.path(&self.wd, self.stream.as_ref())
    }

    /// Create the working directory and record `rev`/`conf` if not yet done.
    pub fn scaffold(&self) -> Result<()> {
        fs::create_dir_all(&self.wd)?;
        for (file, target) in [(ExpFile::Rev, &self.rev), (ExpFile::Conf, &self.conf)] {
            let path = self.path(file);
            if !path.exists() {
                write_atomic(&path, format!("{}\n", target.display()).as_bytes())?;
            }
        }
        Ok(())
    }

    /// Fail with a setup error naming every required file that is absent.
    pub fn check_required(&self) -> Result<()> {
        let missing: Vec<String> = ExpFile::REQUIRED
            .iter()
            .filter(|f| !self.path(**f).exists())
            .map(|f| f.file_name(None))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExpError::Setup(format!(
                "missing in {}: {}",
                self.wd.display(),
                missing.join(", ")
            )))
        }
    }

    /// Copy `rel` from the revision tree unless the working tree has it.
    pub fn checkout(&self, rel: &Path) -> Result<bool> {
        let src = self.rev.join(rel);
        let dst = self.wd.join(rel);
        if dst.exists() {
            debug!(path = ?dst, "already checked out");
            return Ok(false);
        }
        if !src.is_file() {
            return Err(ExpError::Setup(format!(
                "cannot check out {}: not found in revision tree",
                src.display()
            )));
        }
        copy_if_absent(&src, &dst)?;
        info!(file = ?rel, "checked out");
        Ok(true)
    }

    /// Populate a fresh working tree for host configuration `host_tag`.
    ///
    /// The per-host settings files are copied from the configuration tree
    /// into `config/` and linked as `Env_*`. The config index, its listed
    /// files, `config/domains` and `config/submit/submission.json` are
    /// copied when absent. Existing files are never overwritten.
    pub fn setup_files(&self, host_tag: &str) -> Result<()> {
        fs::create_dir_all(&self.wd)?;
        write_atomic(
            &self.path(ExpFile::Rev),
            format!("{}\n", self.rev.display()).as_bytes(),
        )?;
        write_atomic(
            &self.path(ExpFile::Conf),
            format!("{}\n", self.conf.display()).as_bytes(),
        )?;

        for file in ExpFile::HOST_FILES {
            let Some(rel) = file.host_source(host_tag) else {
                continue;
            };
            let local = self.wd.join(&rel);
            let remote = self.conf.join(&rel);
            if !local.exists() {
                if !remote.is_file() {
                    return Err(ExpError::Setup(format!(
                        "host file {} not found for host '{host_tag}'",
                        remote.display()
                    )));
                }
                copy_if_absent(&remote, &local)?;
            }
            symlink_if_absent(Path::new(&rel), &self.path(file))?;
        }

        let conf_config = self.conf.join("config");
        let wd_config = self.wd.join("config");
        let index_src = conf_config.join(CONFIG_INDEX);
        let index_dst = wd_config.join(CONFIG_INDEX);
        if index_src.is_file() {
            copy_if_absent(&index_src, &index_dst)?;
        }
        if index_dst.is_file() {
            let text = fs::read_to_string(&index_dst)?;
            let raw: RawConfigIndex = toml::from_str(&text)?;
            let index = ConfigIndex::try_from(raw)?;
            for name in index.file_names() {
                let dst = wd_config.join(name);
                if dst.exists() {
                    continue;
                }
                let src = conf_config.join(name);
                if !src.is_file() {
                    return Err(ExpError::MissingConfigFile(name.to_string()));
                }
                copy_if_absent(&src, &dst)?;
            }
        }

        let domains = conf_config.join("domains");
        if domains.is_dir() {
            let n = copy_tree_if_absent(&domains, &wd_config.join("domains"))?;
            debug!(copied = n, "domain files");
        }
        let submission = Path::new("config/submit/submission.json");
        if self.conf.join(submission).is_file() {
            copy_if_absent(&self.conf.join(submission), &self.wd.join(submission))?;
        }

        info!(wd = ?self.wd, host = host_tag, "working tree set up");
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.path(ExpFile::Lock).exists()
    }

    pub fn lock(&self) -> Result<()> {
        let path = self.path(ExpFile::Lock);
        write_atomic(&path, b"locked\n")?;
        info!(path = ?path, "experiment locked");
        Ok(())
    }
}

fn read_pointer(wd: &Path, file: ExpFile) -> Result<Option<PathBuf>> {
    let path = file.path(wd, None);
    if !path.is_file() {
        return Ok(None);
    }
    let line = crate::fs::read_single_line(&path)?;
    Ok(Some(PathBuf::from(line)))
}
