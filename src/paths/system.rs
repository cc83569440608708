// src/paths/system.rs

//! Host topology read from `Env_system`.
//!
//! ```toml
//! [HOST_SYSTEM]
//! HOSTS = ["ppi", "remote"]
//! SFX_EXP_DATA = "/data/$EXP"
//! SFX_EXP_LIB = "/lib/$EXP"
//! JOBOUTDIR = "/data/$EXP/job"
//! MKDIR = "mkdir -p"
//! RSYNC = "rsync -a"
//! HOST_NAME = ""
//!
//! [HOST_SYSTEM.HOST1]
//! HOST_NAME = "remote.example.org"
//! SFX_EXP_DATA = "/scratch/$EXP"
//! ```
//!
//! Host 0 is always the control host. `HOSTn` tables override the shared
//! values for host `n`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use tracing::trace;

use crate::errors::{ExpError, Result};
use crate::paths::resolver::{Env, PathContext, PathResolver};
use crate::types::Stream;

pub const SFX_EXP_DATA: &str = "SFX_EXP_DATA";
pub const SFX_EXP_LIB: &str = "SFX_EXP_LIB";
pub const JOBOUTDIR: &str = "JOBOUTDIR";
pub const MKDIR: &str = "MKDIR";
pub const RSYNC: &str = "RSYNC";
pub const HOST_NAME: &str = "HOST_NAME";
pub const SSH: &str = "SSH";
pub const SURFEX_CONFIG: &str = "SURFEX_CONFIG";

/// Fully resolved view of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub host_index: usize,
    /// Label from the `HOSTS` list.
    pub label: String,
    /// Network name used for ssh/rsync; empty for the local machine.
    pub hostname: String,
    pub data_root: String,
    pub lib_root: String,
    pub joboutdir: String,
    pub rsync_cmd: String,
    pub mkdir_cmd: String,
    /// Command prefix for remote execution (`ssh <hostname>`); empty when local.
    pub ssh_prefix: String,
    pub config_tag: String,
}

impl HostEntry {
    pub fn is_remote(&self) -> bool {
        !self.hostname.is_empty()
    }

    /// `host:` prefix for rsync endpoints, empty when local.
    pub fn rsync_prefix(&self) -> String {
        if self.is_remote() {
            format!("{}:", self.hostname)
        } else {
            String::new()
        }
    }
}

/// Per-host variable map for one experiment.
#[derive(Debug, Clone)]
pub struct HostSystem {
    exp_name: String,
    hosts: Vec<String>,
    base: BTreeMap<String, String>,
    overrides: Vec<BTreeMap<String, String>>,
    stream: Option<Stream>,
    env: Env,
}

impl HostSystem {
    /// Parse an `Env_system` document.
    ///
    /// `env` is used for `$NAME` expansion; `EXP` is always set to
    /// `exp_name` in it.
    pub fn from_toml_str(text: &str, exp_name: &str, env: &Env) -> Result<Self> {
        let doc: toml::Table = toml::from_str(text)?;
        let section = doc
            .get("HOST_SYSTEM")
            .and_then(|v| v.as_table())
            .ok_or_else(|| ExpError::Config("Env_system has no [HOST_SYSTEM] table".to_string()))?;

        let hosts: Vec<String> = match section.get("HOSTS") {
            Some(toml::Value::Array(items)) => items.iter().map(scalar_to_string).collect(),
            Some(other) => vec![scalar_to_string(other)],
            None => {
                return Err(ExpError::MissingVariable {
                    var: "HOSTS".to_string(),
                    host: 0,
                });
            }
        };
        if hosts.is_empty() {
            return Err(ExpError::Config("HOSTS must list at least one host".to_string()));
        }

        let mut base = BTreeMap::new();
        for (key, value) in section.iter() {
            if key == "HOSTS" || is_host_table(key, value) {
                continue;
            }
            base.insert(key.clone(), scalar_to_string(value));
        }

        let overrides = (0..hosts.len())
            .map(|i| {
                section
                    .get(&format!("HOST{i}"))
                    .and_then(|v| v.as_table())
                    .map(|t| {
                        t.iter()
                            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                            .collect::<BTreeMap<_, _>>()
                    })
                    .unwrap_or_default()
            })
            .collect();

        let mut env = env.clone();
        env.insert("EXP".to_string(), exp_name.to_string());

        Ok(Self {
            exp_name: exp_name.to_string(),
            hosts,
            base,
            overrides,
            stream: None,
            env,
        })
    }

    pub fn from_file(path: &Path, exp_name: &str, env: &Env) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading host system file {:?}", path))?;
        Self::from_toml_str(&text, exp_name, env)
    }

    /// Attach a stream; `SFX_EXP_LIB` lookups are then suffixed with it.
    pub fn with_stream(mut self, stream: Option<Stream>) -> Self {
        self.stream = stream;
        self
    }

    pub fn exp_name(&self) -> &str {
        &self.exp_name
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    /// Ordered host labels.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Environment used for expansion (process env plus `EXP`).
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Look up `var` for host `host`.
    ///
    /// Host-specific overrides win over shared values. `HOSTS` yields the
    /// space-separated host list and `HOST` the host's own label.
    pub fn get(&self, var: &str, host: usize) -> Result<String> {
        if var == "HOSTS" {
            return Ok(self.hosts.join(" "));
        }
        let label = self.hosts.get(host).ok_or_else(|| ExpError::MissingVariable {
            var: var.to_string(),
            host,
        })?;
        if var == "HOST" {
            return Ok(label.clone());
        }

        let raw = self
            .overrides
            .get(host)
            .and_then(|m| m.get(var))
            .or_else(|| self.base.get(var))
            .ok_or_else(|| ExpError::MissingVariable {
                var: var.to_string(),
                host,
            })?;

        let ctx = PathContext::new(&self.env);
        let mut value = PathResolver::resolve(raw, &ctx, false)?;
        if var == SFX_EXP_LIB {
            if let Some(stream) = &self.stream {
                value.push_str(stream.as_str());
            }
        }
        trace!(var, host, value = %value, "host variable resolved");
        Ok(value)
    }

    fn get_or(&self, var: &str, host: usize, default: String) -> Result<String> {
        match self.get(var, host) {
            Ok(v) => Ok(v),
            Err(ExpError::MissingVariable { .. }) => Ok(default),
            Err(e) => Err(e),
        }
    }

    /// Typed view of host `host`.
    pub fn entry(&self, host: usize) -> Result<HostEntry> {
        let label = self.get("HOST", host)?;
        let hostname = self.get_or(HOST_NAME, host, String::new())?;
        let default_ssh = if hostname.is_empty() {
            String::new()
        } else {
            format!("ssh {hostname}")
        };
        Ok(HostEntry {
            host_index: host,
            data_root: self.get(SFX_EXP_DATA, host)?,
            lib_root: self.get(SFX_EXP_LIB, host)?,
            joboutdir: self.get(JOBOUTDIR, host)?,
            rsync_cmd: self.get(RSYNC, host)?,
            mkdir_cmd: self.get(MKDIR, host)?,
            ssh_prefix: self.get_or(SSH, host, default_ssh)?,
            config_tag: self.get_or(SURFEX_CONFIG, host, label.clone())?,
            hostname,
            label,
        })
    }
}

fn is_host_table(key: &str, value: &toml::Value) -> bool {
    value.is_table()
        && key
            .strip_prefix("HOST")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
