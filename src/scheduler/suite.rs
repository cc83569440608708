// src/scheduler/suite.rs

//! Suite construction and the ecFlow text definition format.
//!
//! A surfex suite holds one family per cycle DTG, each with the configured
//! tasks chained by triggers. Each family waits for the previous one. A
//! testbed suite wraps that layout in one outer family per testbed overlay.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, info};

use crate::config::SuiteSettings;
use crate::errors::{ExpError, Result};
use crate::fs::write_atomic;
use crate::progress::Progress;
use crate::scheduler::schedule::ForecastCycleSchedule;
use crate::types::{Dtg, SuiteKind};

/// One cycle of the suite and its interval to the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    pub dtg: Dtg,
    pub fcint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub name: String,
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub name: String,
    pub edits: Vec<(String, String)>,
    pub trigger: Option<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Family(Family),
    Task(TaskNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteDefinition {
    pub name: String,
    pub edits: Vec<(String, String)>,
    pub cycles: Vec<Cycle>,
    pub nodes: Vec<Node>,
}

impl SuiteDefinition {
    /// Absolute node path of the suite.
    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }

    pub fn dtgs(&self) -> Vec<Dtg> {
        self.cycles.iter().map(|c| c.dtg).collect()
    }

    /// Render the ecFlow `.def` text.
    pub fn to_def(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "suite {}", self.name);
        write_edits(&mut out, 1, &self.edits);
        for node in &self.nodes {
            write_node(&mut out, 1, node);
        }
        out.push_str("endsuite\n");
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_def().as_bytes())?;
        info!(suite = %self.name, path = ?path, cycles = self.cycles.len(), "wrote suite definition");
        Ok(())
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_edits(out: &mut String, depth: usize, edits: &[(String, String)]) {
    for (key, value) in edits {
        indent(out, depth);
        let _ = writeln!(out, "edit {key} '{}'", value.replace('\'', "\\'"));
    }
}

fn write_node(out: &mut String, depth: usize, node: &Node) {
    match node {
        Node::Task(task) => {
            indent(out, depth);
            let _ = writeln!(out, "task {}", task.name);
            if let Some(trigger) = &task.trigger {
                indent(out, depth + 1);
                let _ = writeln!(out, "trigger {trigger}");
            }
        }
        Node::Family(family) => {
            indent(out, depth);
            let _ = writeln!(out, "family {}", family.name);
            write_edits(out, depth + 1, &family.edits);
            if let Some(trigger) = &family.trigger {
                indent(out, depth + 1);
                let _ = writeln!(out, "trigger {trigger}");
            }
            for child in &family.children {
                write_node(out, depth + 1, child);
            }
            indent(out, depth);
            out.push_str("endfamily\n");
        }
    }
}

/// ecFlow node names allow letters, digits, `_` and `.`.
pub fn node_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn all_complete(deps: &[String]) -> Option<String> {
    if deps.is_empty() {
        return None;
    }
    Some(
        deps.iter()
            .map(|d| format!("{d} == complete"))
            .collect::<Vec<_>>()
            .join(" and "),
    )
}

pub struct SuiteBuilder<'a> {
    name: String,
    schedule: &'a ForecastCycleSchedule,
    settings: &'a SuiteSettings,
    edits: Vec<(String, String)>,
}

impl<'a> SuiteBuilder<'a> {
    pub fn new(
        name: impl Into<String>,
        schedule: &'a ForecastCycleSchedule,
        settings: &'a SuiteSettings,
    ) -> Self {
        Self {
            name: name.into(),
            schedule,
            settings,
            edits: Vec::new(),
        }
    }

    /// Add a suite-level variable.
    pub fn edit(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.edits.push((key.into(), value.into()));
        self
    }

    /// Cycles from `begin` to `end` inclusive, stepping by the scheduled
    /// interval at each cycle hour.
    pub fn cycles(&self, begin: Dtg, end: Dtg) -> Result<Vec<Cycle>> {
        let mut out = Vec::new();
        let mut dtg = begin;
        while dtg <= end {
            let fcint = self.schedule.interval_at(dtg.hour())?;
            out.push(Cycle { dtg, fcint });
            dtg = dtg.add_hours(i64::from(fcint))?;
        }
        Ok(out)
    }

    pub fn build(
        &self,
        kind: SuiteKind,
        progress: &Progress,
        testbed_configurations: &[String],
    ) -> Result<SuiteDefinition> {
        let cycles = self.cycles(progress.dtg_begin(), progress.dtg_end())?;
        let families = self.cycle_families(&cycles, progress);

        let nodes = match kind {
            SuiteKind::Surfex => families,
            SuiteKind::Testbed => {
                if testbed_configurations.is_empty() {
                    return Err(ExpError::Config(
                        "testbed suite needs [testbed].configurations".to_string(),
                    ));
                }
                testbed_configurations
                    .iter()
                    .map(|conf| {
                        Node::Family(Family {
                            name: node_name(conf),
                            edits: vec![("TESTBED_CONF".to_string(), conf.clone())],
                            trigger: None,
                            children: families.clone(),
                        })
                    })
                    .collect()
            }
        };

        let mut edits = self.edits.clone();
        if let Some(cmd) = &self.settings.job_cmd {
            edits.push(("ECF_JOB_CMD".to_string(), cmd.clone()));
        }
        if let Some(cmd) = &self.settings.kill_cmd {
            edits.push(("ECF_KILL_CMD".to_string(), cmd.clone()));
        }

        debug!(suite = %self.name, ?kind, cycles = cycles.len(), "built suite");
        Ok(SuiteDefinition {
            name: self.name.clone(),
            edits,
            cycles,
            nodes,
        })
    }

    fn cycle_families(&self, cycles: &[Cycle], progress: &Progress) -> Vec<Node> {
        let tasks: Vec<Node> = self
            .settings
            .tasks
            .iter()
            .map(|task| {
                Node::Task(TaskNode {
                    name: node_name(task),
                    trigger: all_complete(
                        &self
                            .settings
                            .dependencies_of(task)
                            .iter()
                            .map(|d| node_name(d))
                            .collect::<Vec<_>>(),
                    ),
                })
            })
            .collect();

        let mut out = Vec::with_capacity(cycles.len());
        let mut previous: Option<String> = None;
        for cycle in cycles {
            let name = cycle.dtg.to_string();
            let dtgbeg = match cycle.dtg.sub_hours(i64::from(cycle.fcint)) {
                Ok(prev) if prev >= progress.dtg_begin() => progress.dtg_begin(),
                _ => cycle.dtg,
            };
            out.push(Node::Family(Family {
                name: name.clone(),
                edits: vec![
                    ("DTG".to_string(), name.clone()),
                    ("DTGBEG".to_string(), dtgbeg.to_string()),
                    ("FCINT".to_string(), cycle.fcint.to_string()),
                ],
                // Family names are all digits; `./` keeps them paths, not numbers.
                trigger: previous.as_ref().map(|p| format!("./{p} == complete")),
                children: tasks.clone(),
            }));
            previous = Some(name);
        }
        out
    }
}
