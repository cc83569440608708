// src/logging.rs

//! Logging for `expflow`.
//!
//! Diagnostics go through `tracing` to STDERR. Priority for the level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `EXPFLOW_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Separately, [`EcfLog`] appends operator-facing lines to the scheduler
//! log (`ECF.log`) of an experiment.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing_subscriber::fmt;

use crate::cli::LogLevel;
use crate::errors::Result;

pub const LOG_ENV_VAR: &str = "EXPFLOW_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> anyhow::Result<()> {
    let level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var(LOG_ENV_VAR)
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("initialising logging: {e}"))?;

    Ok(())
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

/// Append-only scheduler log (`ECF.log`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcfLog {
    path: PathBuf,
}

impl EcfLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `text` with a `[HH:MM:SS dd.mm.YYYY]` UTC prefix.
    pub fn append(&self, text: &str) -> Result<()> {
        self.append_at(Utc::now(), text)
    }

    pub fn append_at(&self, now: DateTime<Utc>, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log dir {:?}", parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening scheduler log {:?}", self.path))?;
        writeln!(file, "{} {}", format_stamp(now), text)
            .with_context(|| format!("writing scheduler log {:?}", self.path))?;
        Ok(())
    }
}

fn format_stamp(now: DateTime<Utc>) -> String {
    now.format("[%H:%M:%S %d.%m.%Y]").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn level_strings() {
        assert_eq!(parse_level_str(" Warning "), Some(tracing::Level::WARN));
        assert_eq!(parse_level_str("loud"), None);
    }

    #[test]
    fn ecf_log_lines_are_stamped_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = EcfLog::new(dir.path().join("data/ECF.log"));
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 6, 5, 9).unwrap();
        log.append_at(t, "/exp/2024030106/forecast abort").unwrap();
        log.append_at(t, "second").unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            text,
            "[06:05:09 01.03.2024] /exp/2024030106/forecast abort\n[06:05:09 01.03.2024] second\n"
        );
    }
}
