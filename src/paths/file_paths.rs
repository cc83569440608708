// src/paths/file_paths.rs

//! Logical directory names mapped onto one host's data/lib roots.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::{ExpError, Result};
use crate::paths::resolver::{Env, PathContext, PathResolver};
use crate::paths::system::{HostSystem, SFX_EXP_DATA, SFX_EXP_LIB};

/// Logical-name → template map for one host.
#[derive(Debug, Clone)]
pub struct SystemFilePaths {
    paths: BTreeMap<String, String>,
    data_root: String,
    lib_root: String,
    env: Env,
}

impl SystemFilePaths {
    /// Build the path table for `host`.
    ///
    /// `input_paths` holds explicitly configured entries (from
    /// `Env_input_paths`); the canonical data-layout entries are added on
    /// top, except `bin_dir` which keeps an explicit value when present.
    /// The data and lib roots are created when the host is local.
    pub fn new(
        input_paths: BTreeMap<String, String>,
        system: &HostSystem,
        host: usize,
    ) -> Result<Self> {
        let env = system.env().clone();
        let ctx = PathContext::new(&env);
        let data = PathResolver::resolve(&system.get(SFX_EXP_DATA, host)?, &ctx, true)?;
        let lib = PathResolver::resolve(&system.get(SFX_EXP_LIB, host)?, &ctx, true)?;

        let mut table = Self {
            paths: input_paths,
            data_root: data.clone(),
            lib_root: lib.clone(),
            env,
        };

        let entry = system.entry(host)?;
        if entry.is_remote() {
            debug!(host, data = %data, lib = %lib, "remote host; roots are created by sync");
        } else {
            for root in [&data, &lib] {
                fs::create_dir_all(root).with_context(|| format!("creating root dir {root}"))?;
            }
        }

        let archive = format!("{data}/archive/@YYYY@/@MM@/@DD@/@HH@/@EEE@/");
        let climate = format!("{data}/climate/@EEE@/");
        let bin_dir = table
            .paths
            .get("bin_dir")
            .cloned()
            .unwrap_or_else(|| format!("{data}/bin/"));

        table.add("sfx_exp_data", &data);
        table.add("sfx_exp_lib", &lib);
        table.add("archive_dir", &archive);
        table.add("extrarch_dir", &format!("{data}/archive/extract/@EEE@/"));
        table.add("climdir", &climate);
        table.add("pgd_dir", &climate);
        table.add("bin_dir", &bin_dir);
        table.add("wrk_dir", &format!("{data}/@YYYY@@MM@@DD@_@HH@/@EEE@/"));
        table.add("forcing_dir", &format!("{data}/forcing/@YYYY@@MM@@DD@@HH@/@EEE@/"));
        table.add("prep_dir", &archive);
        table.add(
            "obs_dir",
            &format!("{data}/archive/observations/@YYYY@/@MM@/@DD@/@HH@/@EEE@/"),
        );
        table.add("first_guess_dir", &archive);

        Ok(table)
    }

    /// Load `Env_input_paths` (a flat JSON object) and build the table.
    pub fn from_input_paths_file(path: &Path, system: &HostSystem, host: usize) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading input paths file {:?}", path))?;
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)?;
        let mut paths = BTreeMap::new();
        for (key, value) in raw {
            match value {
                serde_json::Value::String(s) => {
                    paths.insert(key, s);
                }
                other => warn!(key = %key, value = %other, "ignoring non-string input path"),
            }
        }
        Self::new(paths, system, host)
    }

    /// Register or replace a logical path.
    pub fn add(&mut self, name: &str, template: &str) {
        self.paths.insert(name.to_string(), template.to_string());
    }

    /// Raw template for `name`, before substitution.
    pub fn template(&self, name: &str) -> Option<&str> {
        self.paths.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Base context carrying the experiment environment. Add a DTG and
    /// member with the builder methods on [`PathContext`].
    pub fn context(&self) -> PathContext<'_> {
        PathContext::new(&self.env)
    }

    /// Resolve logical path `name` against `ctx`.
    pub fn get(&self, name: &str, ctx: &PathContext<'_>, check_parsing: bool) -> Result<String> {
        let template = self
            .paths
            .get(name)
            .ok_or_else(|| ExpError::Config(format!("unknown system path '{name}'")))?;
        PathResolver::resolve(template, ctx, check_parsing)
    }

    pub fn get_path(&self, name: &str, ctx: &PathContext<'_>, check_parsing: bool) -> Result<PathBuf> {
        self.get(name, ctx, check_parsing).map(PathBuf::from)
    }

    pub fn data_root(&self) -> &str {
        &self.data_root
    }

    pub fn lib_root(&self) -> &str {
        &self.lib_root
    }
}
