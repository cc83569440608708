// src/config/loader.rs

//! Layered configuration loading.
//!
//! Layers, later ones winning:
//! 1. `<rev>/config/<file>` for every file listed in the index
//! 2. `<wd>/config/<file>`
//! 3. preset `config/configurations/<name>.toml`
//! 4. testbed overlay `config/testbed/<name>[.toml]`
//! 5. ad-hoc user settings
//!
//! Only the blocks the index declares for a file are taken from it.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::merge::{Settings, deep_merge};
use crate::config::model::{ConfigIndex, Configuration, RawConfigIndex};
use crate::errors::{ExpError, Result};
use crate::fs::write_atomic;

/// Index file name, relative to a `config/` directory.
pub const CONFIG_INDEX: &str = "config.toml";

/// Caller-selected layers and behaviour.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub preset: Option<String>,
    pub testbed: Option<String>,
    pub user_settings: Vec<Settings>,
    /// Experiment is locked: skip the revision defaults and the
    /// preset/testbed layers, the working tree is authoritative.
    pub locked: bool,
    /// Write the merged blocks back into `<wd>/config`.
    pub write_config_files: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigurationLoader {
    rev: PathBuf,
    wd: PathBuf,
}

impl ConfigurationLoader {
    pub fn new(rev: impl Into<PathBuf>, wd: impl Into<PathBuf>) -> Self {
        Self {
            rev: rev.into(),
            wd: wd.into(),
        }
    }

    fn rev_config(&self) -> PathBuf {
        self.rev.join("config")
    }

    fn wd_config(&self) -> PathBuf {
        self.wd.join("config")
    }

    /// Path of the index in effect: working tree first, then revision.
    pub fn index_path(&self) -> Result<PathBuf> {
        first_existing(&[
            self.wd_config().join(CONFIG_INDEX),
            self.rev_config().join(CONFIG_INDEX),
        ])
        .ok_or_else(|| ExpError::MissingConfigFile(format!("config/{CONFIG_INDEX}")))
    }

    pub fn index(&self) -> Result<ConfigIndex> {
        let path = self.index_path()?;
        let text = fs::read_to_string(&path)?;
        let raw: RawConfigIndex = toml::from_str(&text)?;
        ConfigIndex::try_from(raw)
    }

    /// Merge all layers into a single tree (member section still inside).
    pub fn merged_settings(&self, opts: &LoadOptions) -> Result<Settings> {
        let index = self.index()?;
        let mut all = Settings::new();

        for (file, blocks) in index.files() {
            let tree = self.file_tree(file, opts.locked)?;
            for block in blocks {
                let value = tree.get(block).ok_or_else(|| {
                    ExpError::Config(format!("block '{block}' declared for {file} is missing"))
                })?;
                let mut layer = Settings::new();
                layer.insert(block.clone(), value.clone());
                deep_merge(&mut all, &layer);
            }
            debug!(file, blocks = blocks.len(), "merged config file");
        }

        if opts.locked {
            if opts.preset.is_some() || opts.testbed.is_some() {
                warn!("experiment is locked; ignoring preset and testbed layers");
            }
        } else {
            if let Some(preset) = &opts.preset {
                let path = self.preset_path(preset)?;
                info!(preset = %preset, path = ?path, "applying configuration preset");
                deep_merge(&mut all, &load_settings_file(&path)?);
            }
            if let Some(testbed) = &opts.testbed {
                let overlay = self.merge_testbed_configuration(&[testbed.as_str()])?;
                info!(testbed = %testbed, "applying testbed overlay");
                deep_merge(&mut all, &overlay);
            }
        }

        for user in &opts.user_settings {
            deep_merge(&mut all, user);
        }

        Ok(all)
    }

    /// Build the frozen [`Configuration`], writing the working-tree copies
    /// first when asked to.
    pub fn load(&self, opts: &LoadOptions) -> Result<Configuration> {
        let all = self.merged_settings(opts)?;
        if opts.write_config_files {
            self.write_config_files(&all)?;
        }
        Configuration::from_merged(all)
    }

    /// Merge testbed overlays in order into one uncommitted tree.
    pub fn merge_testbed_configuration(&self, names: &[&str]) -> Result<Settings> {
        let mut out = Settings::new();
        for name in names {
            let path = self.testbed_path(name)?;
            debug!(testbed = %name, path = ?path, "loading testbed overlay");
            deep_merge(&mut out, &load_settings_file(&path)?);
        }
        Ok(out)
    }

    /// Write each indexed file with its blocks from `all` into `<wd>/config`.
    pub fn write_config_files(&self, all: &Settings) -> Result<()> {
        let index = self.index()?;
        let dir = self.wd_config();
        fs::create_dir_all(&dir)?;

        let index_dst = dir.join(CONFIG_INDEX);
        let index_src = self.index_path()?;
        if index_src != index_dst {
            fs::copy(&index_src, &index_dst)?;
        }

        for (file, blocks) in index.files() {
            let mut out = Settings::new();
            for block in blocks {
                if let Some(value) = all.get(block) {
                    out.insert(block.clone(), value.clone());
                }
            }
            let text = toml::to_string(&Value::Object(out))?;
            write_atomic(&dir.join(file), text.as_bytes())?;
            debug!(file, "wrote working-tree config file");
        }
        info!(dir = ?dir, "config files written to working tree");
        Ok(())
    }

    /// Merged tree of one indexed file: revision copy overlaid by the
    /// working-tree copy. Locked experiments read the working tree only.
    fn file_tree(&self, file: &str, locked: bool) -> Result<Settings> {
        let rev_path = self.rev_config().join(file);
        let wd_path = self.wd_config().join(file);

        let mut tree = Settings::new();
        let mut found = false;
        if !locked && rev_path.is_file() {
            deep_merge(&mut tree, &load_settings_file(&rev_path)?);
            found = true;
        }
        if wd_path.is_file() {
            deep_merge(&mut tree, &load_settings_file(&wd_path)?);
            found = true;
        }
        if !found {
            return Err(ExpError::MissingConfigFile(file.to_string()));
        }
        Ok(tree)
    }

    fn preset_path(&self, name: &str) -> Result<PathBuf> {
        let file = format!("{}.toml", name.to_lowercase());
        first_existing(&[
            self.wd_config().join("configurations").join(&file),
            self.rev_config().join("configurations").join(&file),
        ])
        .ok_or_else(|| ExpError::MissingConfigFile(format!("config/configurations/{file}")))
    }

    fn testbed_path(&self, name: &str) -> Result<PathBuf> {
        let mut candidates = Vec::new();
        for root in [self.wd_config(), self.rev_config()] {
            let dir = root.join("testbed");
            candidates.push(dir.join(name));
            candidates.push(dir.join(format!("{name}.toml")));
        }
        first_existing(&candidates)
            .ok_or_else(|| ExpError::MissingConfigFile(format!("config/testbed/{name}")))
    }
}

/// Read a settings tree from TOML, or JSON when the extension says so.
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    let text = fs::read_to_string(path)?;
    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => toml::from_str(&text)?,
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ExpError::Config(format!(
            "settings file {} is not a table",
            path.display()
        ))),
    }
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}
