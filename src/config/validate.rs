// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigIndex, GeneralSettings, RawConfigIndex, SuiteSettings};
use crate::errors::{ExpError, Result};

impl TryFrom<RawConfigIndex> for ConfigIndex {
    type Error = ExpError;

    fn try_from(raw: RawConfigIndex) -> std::result::Result<Self, Self::Error> {
        if raw.config_files.is_empty() {
            return Err(ExpError::Config(
                "config index must list at least one file in `config_files`".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(raw.config_files.len());
        for name in raw.config_files {
            if !seen.insert(name.clone()) {
                return Err(ExpError::Config(format!(
                    "config file '{name}' listed twice in `config_files`"
                )));
            }
            let entry = raw.files.get(&name).ok_or_else(|| {
                ExpError::Config(format!("config index has no [\"{name}\"] block list"))
            })?;
            files.push((name, entry.blocks.clone()));
        }
        Ok(ConfigIndex::new_unchecked(files))
    }
}

/// Cycle hours must be valid hours of day and unique.
pub fn validate_hours(general: &GeneralSettings) -> Result<()> {
    let mut seen = HashSet::new();
    for hh in &general.hh_list {
        if *hh > 23 {
            return Err(ExpError::Schedule(format!(
                "cycle hour {hh} is outside 0..=23"
            )));
        }
        if !seen.insert(*hh) {
            return Err(ExpError::Schedule(format!("cycle hour {hh} listed twice")));
        }
    }
    Ok(())
}

/// Task declarations must be unique, reference known tasks and be acyclic.
pub fn validate_suite(suite: &SuiteSettings) -> Result<()> {
    if suite.tasks.is_empty() {
        return Err(ExpError::Config("[suite].tasks must not be empty".to_string()));
    }

    let known: HashSet<&str> = suite.tasks.iter().map(String::as_str).collect();
    if known.len() != suite.tasks.len() {
        return Err(ExpError::Config("[suite].tasks contains duplicates".to_string()));
    }

    for (name, deps) in suite.after.iter() {
        if !known.contains(name.as_str()) {
            return Err(ExpError::Config(format!(
                "[suite.after] refers to undeclared task '{name}'"
            )));
        }
        for dep in deps {
            if dep == name {
                return Err(ExpError::Config(format!(
                    "task '{name}' cannot depend on itself in [suite.after]"
                )));
            }
            if !known.contains(dep.as_str()) {
                return Err(ExpError::Config(format!(
                    "task '{name}' has unknown dependency '{dep}' in [suite.after]"
                )));
            }
        }
    }

    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in suite.tasks.iter() {
        graph.add_node(name.as_str());
    }
    let deps: Vec<(String, Vec<String>)> = suite
        .tasks
        .iter()
        .map(|t| (t.clone(), suite.dependencies_of(t)))
        .collect();
    for (name, task_deps) in deps.iter() {
        for dep in task_deps {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(ExpError::Config(format!(
            "cycle detected in suite tasks involving '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn suite(tasks: &[&str], after: &[(&str, &[&str])]) -> SuiteSettings {
        SuiteSettings {
            tasks: tasks.iter().map(|s| s.to_string()).collect(),
            after: after
                .iter()
                .map(|(t, d)| (t.to_string(), d.iter().map(|s| s.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
            job_cmd: None,
            kill_cmd: None,
        }
    }

    #[test]
    fn default_chain_is_valid() {
        assert!(validate_suite(&SuiteSettings::default()).is_ok());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let s = suite(&["pgd", "prep"], &[("prep", &["nope"])]);
        let err = validate_suite(&s).unwrap_err();
        assert!(matches!(err, ExpError::Config(ref m) if m.contains("unknown dependency")));
    }

    #[test]
    fn cycle_is_rejected() {
        let s = suite(&["a", "b"], &[("a", &["b"])]);
        let err = validate_suite(&s).unwrap_err();
        assert!(matches!(err, ExpError::Config(ref m) if m.contains("cycle detected")));
    }

    #[test]
    fn hours_must_be_unique_and_in_range() {
        let mut g = GeneralSettings::default();
        g.hh_list = vec![0, 6, 6];
        assert!(matches!(validate_hours(&g), Err(ExpError::Schedule(_))));
        g.hh_list = vec![0, 24];
        assert!(matches!(validate_hours(&g), Err(ExpError::Schedule(_))));
    }
}
