// src/config/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::merge::{Settings, get_path, merged};
use crate::errors::{ExpError, Result};
use crate::types::{Dtg, Member};

/// Section holding per-member overrides in the merged tree.
pub const MEMBER_SETTINGS: &str = "member_settings";

/// Top-level index (`config/config.toml`).
///
/// ```toml
/// config_files = ["config_exp.toml", "config_exp_surfex.toml"]
///
/// ["config_exp.toml"]
/// blocks = ["general", "suite"]
///
/// ["config_exp_surfex.toml"]
/// blocks = ["surfex"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigIndex {
    pub config_files: Vec<String>,

    #[serde(flatten)]
    pub files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileEntry {
    #[serde(default)]
    pub blocks: Vec<String>,
}

/// Validated index: every listed file has a block list.
#[derive(Debug, Clone)]
pub struct ConfigIndex {
    files: Vec<(String, Vec<String>)>,
}

impl ConfigIndex {
    pub(crate) fn new_unchecked(files: Vec<(String, Vec<String>)>) -> Self {
        Self { files }
    }

    /// Files in declared order together with their block lists.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.files.iter().map(|(f, b)| (f.as_str(), b.as_slice()))
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(f, _)| f.as_str())
    }
}

/// `[general]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSettings {
    /// Cycle hours of day; ints or zero-padded strings.
    #[serde(default, deserialize_with = "deserialize_hours")]
    pub hh_list: Vec<u32>,

    /// Seed for `DTG`/`DTGBEG` when no progress file exists yet.
    #[serde(default)]
    pub dtg_start: Option<Dtg>,

    /// Seed for `DTGEND` when no progress file exists yet.
    #[serde(default)]
    pub dtg_end: Option<Dtg>,

    #[serde(default)]
    pub members: Vec<u32>,

    #[serde(default = "default_ecf_tries")]
    pub ecf_tries: u32,
}

fn default_ecf_tries() -> u32 {
    1
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            hh_list: Vec::new(),
            dtg_start: None,
            dtg_end: None,
            members: Vec::new(),
            ecf_tries: default_ecf_tries(),
        }
    }
}

/// `[suite]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteSettings {
    /// Tasks in each cycle family, in declared order.
    #[serde(default = "default_suite_tasks")]
    pub tasks: Vec<String>,

    /// Explicit dependencies; a task without an entry waits for the task
    /// declared before it.
    #[serde(default)]
    pub after: BTreeMap<String, Vec<String>>,

    /// `ECF_JOB_CMD` for the suite, if set.
    #[serde(default)]
    pub job_cmd: Option<String>,

    /// `ECF_KILL_CMD` for the suite, if set.
    #[serde(default)]
    pub kill_cmd: Option<String>,
}

fn default_suite_tasks() -> Vec<String> {
    ["pgd", "prep", "forecast", "archive", "post"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self {
            tasks: default_suite_tasks(),
            after: BTreeMap::new(),
            job_cmd: None,
            kill_cmd: None,
        }
    }
}

impl SuiteSettings {
    /// Effective dependency list of `task`.
    pub fn dependencies_of(&self, task: &str) -> Vec<String> {
        if let Some(deps) = self.after.get(task) {
            return deps.clone();
        }
        let pos = self.tasks.iter().position(|t| t == task);
        match pos {
            Some(i) if i > 0 => vec![self.tasks[i - 1].clone()],
            _ => Vec::new(),
        }
    }
}

/// `[testbed]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TestbedSettings {
    #[serde(default)]
    pub configurations: Vec<String>,
}

fn deserialize_hours<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Hour {
        Int(u32),
        Str(String),
    }

    let raw = Vec::<Hour>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|h| match h {
            Hour::Int(i) => Ok(i),
            Hour::Str(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|_| serde::de::Error::custom(format!("invalid cycle hour '{s}'"))),
        })
        .collect()
}

/// Frozen settings tree plus per-member overlays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    settings: Settings,
    members: BTreeMap<u32, Settings>,
}

impl Configuration {
    /// Split the reserved member section out of a merged tree.
    pub fn from_merged(mut all: Settings) -> Result<Self> {
        let mut members = BTreeMap::new();
        if let Some(section) = all.remove(MEMBER_SETTINGS) {
            let table = match section {
                Value::Object(t) => t,
                other => {
                    return Err(ExpError::Config(format!(
                        "[{MEMBER_SETTINGS}] must be a table, got {other}"
                    )));
                }
            };
            for (key, value) in table {
                let id: u32 = key.trim().parse().map_err(|_| {
                    ExpError::Config(format!("invalid member id '{key}' in [{MEMBER_SETTINGS}]"))
                })?;
                match value {
                    Value::Object(overlay) => {
                        members.insert(id, overlay);
                    }
                    other => {
                        return Err(ExpError::Config(format!(
                            "member {id} settings must be a table, got {other}"
                        )));
                    }
                }
            }
        }
        Ok(Self {
            settings: all,
            members,
        })
    }

    /// Master tree (member section removed).
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn member_overlays(&self) -> &BTreeMap<u32, Settings> {
        &self.members
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.settings, path)
    }

    /// Master tree with `member`'s overlay applied.
    pub fn settings_for_member(&self, member: Member) -> Settings {
        match self.members.get(&member.0) {
            Some(overlay) => merged(&self.settings, overlay),
            None => self.settings.clone(),
        }
    }

    pub fn get_for_member(&self, path: &str, member: Member) -> Option<Value> {
        get_path(&self.settings_for_member(member), path).cloned()
    }

    /// Members listed in `general.members`, else those with overlays, else
    /// the single deterministic member 0.
    pub fn members(&self) -> Result<Vec<Member>> {
        let general = self.general()?;
        let ids: Vec<u32> = if !general.members.is_empty() {
            general.members
        } else if !self.members.is_empty() {
            self.members.keys().copied().collect()
        } else {
            vec![0]
        };
        Ok(ids.into_iter().map(Member).collect())
    }

    pub fn general(&self) -> Result<GeneralSettings> {
        section(&self.settings, "general")
    }

    pub fn general_for_member(&self, member: Member) -> Result<GeneralSettings> {
        section(&self.settings_for_member(member), "general")
    }

    pub fn suite(&self) -> Result<SuiteSettings> {
        let suite: SuiteSettings = section(&self.settings, "suite")?;
        crate::config::validate::validate_suite(&suite)?;
        Ok(suite)
    }

    pub fn testbed(&self) -> Result<TestbedSettings> {
        section(&self.settings, "testbed")
    }
}

fn section<T>(settings: &Settings, name: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match settings.get(name) {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ExpError::Config(format!("invalid [{name}] section: {e}"))),
    }
}
