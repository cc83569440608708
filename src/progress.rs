// src/progress.rs

//! The experiment clock: a sliding `(DTGBEG, DTG, DTGEND, DTGPP)` window.
//!
//! The main window lives in `progress.toml` and the post-processing position
//! in `progressPP.toml`. Every successful [`Progress::advance`] rewrites both
//! files atomically before the in-memory state changes.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GeneralSettings;
use crate::errors::{ExpError, Result};
use crate::fs::write_atomic;
use crate::types::Dtg;

/// On-disk locations of the two progress files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressFiles {
    pub main: PathBuf,
    pub pp: PathBuf,
}

impl ProgressFiles {
    pub fn new(main: impl Into<PathBuf>, pp: impl Into<PathBuf>) -> Self {
        Self {
            main: main.into(),
            pp: pp.into(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MainFile {
    #[serde(rename = "DTGBEG", default, skip_serializing_if = "Option::is_none")]
    dtgbeg: Option<Dtg>,
    #[serde(rename = "DTG", default, skip_serializing_if = "Option::is_none")]
    dtg: Option<Dtg>,
    #[serde(rename = "DTGEND", default, skip_serializing_if = "Option::is_none")]
    dtgend: Option<Dtg>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PpFile {
    #[serde(rename = "DTGPP", default, skip_serializing_if = "Option::is_none")]
    dtgpp: Option<Dtg>,
}

#[derive(Debug, Clone)]
pub struct Progress {
    dtg_begin: Dtg,
    dtg_current: Dtg,
    dtg_end: Dtg,
    dtg_pp: Dtg,
    store: Option<ProgressFiles>,
}

/// Equality compares the window only, not where it is stored.
impl PartialEq for Progress {
    fn eq(&self, other: &Self) -> bool {
        self.dtg_begin == other.dtg_begin
            && self.dtg_current == other.dtg_current
            && self.dtg_end == other.dtg_end
            && self.dtg_pp == other.dtg_pp
    }
}

impl Eq for Progress {}

impl Progress {
    /// In-memory window; fails if the ordering invariants do not hold.
    pub fn new(dtg_begin: Dtg, dtg_current: Dtg, dtg_end: Dtg, dtg_pp: Dtg) -> Result<Self> {
        let progress = Self {
            dtg_begin,
            dtg_current,
            dtg_end,
            dtg_pp,
            store: None,
        };
        progress.check()?;
        Ok(progress)
    }

    /// Window starting and ending at `dtg`.
    pub fn at(dtg: Dtg) -> Self {
        Self {
            dtg_begin: dtg,
            dtg_current: dtg,
            dtg_end: dtg,
            dtg_pp: dtg,
            store: None,
        }
    }

    /// Attach the files every later `advance` persists to.
    pub fn with_store(mut self, files: ProgressFiles) -> Self {
        self.store = Some(files);
        self
    }

    /// Read the progress files.
    ///
    /// `DTG` is mandatory; `DTGBEG`, `DTGEND` and `DTGPP` default to it.
    /// When `progress.toml` is absent the window is seeded from
    /// `general.dtg_start` / `general.dtg_end`.
    pub fn load(files: ProgressFiles, general: &GeneralSettings) -> Result<Self> {
        if !files.main.is_file() {
            let start = general.dtg_start.ok_or_else(|| {
                ExpError::ProgressCorrupt(format!(
                    "{} is missing and [general].dtg_start is not set",
                    files.main.display()
                ))
            })?;
            let end = general.dtg_end.unwrap_or(start).max(start);
            info!(start = %start, end = %end, "no progress file; seeding from configuration");
            let mut seeded = Self::new(start, start, end, start)?;
            if let Some(pp) = read_pp(&files.pp)? {
                seeded.dtg_pp = pp;
                seeded.check()?;
            }
            return Ok(seeded.with_store(files));
        }

        let main: MainFile = read_toml(&files.main)?;
        let current = main.dtg.ok_or_else(|| {
            ExpError::ProgressCorrupt(format!("{} has no DTG", files.main.display()))
        })?;
        let pp = read_pp(&files.pp)?.unwrap_or(current);

        let progress = Self::new(
            main.dtgbeg.unwrap_or(current),
            current,
            main.dtgend.unwrap_or(current),
            pp,
        )?;
        debug!(
            dtgbeg = %progress.dtg_begin,
            dtg = %progress.dtg_current,
            dtgend = %progress.dtg_end,
            dtgpp = %progress.dtg_pp,
            "loaded progress"
        );
        Ok(progress.with_store(files))
    }

    pub fn dtg_begin(&self) -> Dtg {
        self.dtg_begin
    }

    pub fn dtg_current(&self) -> Dtg {
        self.dtg_current
    }

    pub fn dtg_end(&self) -> Dtg {
        self.dtg_end
    }

    pub fn dtg_pp(&self) -> Dtg {
        self.dtg_pp
    }

    pub fn store(&self) -> Option<&ProgressFiles> {
        self.store.as_ref()
    }

    /// Move `DTG` (or `DTGPP` when `pp`) forward by `fcint_hours`.
    ///
    /// `DTGEND` is widened when `DTG` passes it. `DTGPP` may not pass
    /// `DTGEND`. The new window is persisted before it is committed here.
    pub fn advance(&mut self, fcint_hours: u32, pp: bool) -> Result<()> {
        let hours = i64::from(fcint_hours);
        let mut next = self.clone();
        if pp {
            next.dtg_pp = self.dtg_pp.add_hours(hours)?;
            if next.dtg_pp > next.dtg_end {
                return Err(ExpError::Schedule(format!(
                    "post-processing DTG {} would pass DTGEND {}",
                    next.dtg_pp, next.dtg_end
                )));
            }
        } else {
            next.dtg_current = self.dtg_current.add_hours(hours)?;
            if next.dtg_current > next.dtg_end {
                debug!(old = %next.dtg_end, new = %next.dtg_current, "widening DTGEND");
                next.dtg_end = next.dtg_current;
            }
        }
        next.check()?;
        next.save()?;
        info!(
            pp,
            fcint = fcint_hours,
            dtg = %next.dtg_current,
            dtgend = %next.dtg_end,
            dtgpp = %next.dtg_pp,
            "progress advanced"
        );
        *self = next;
        Ok(())
    }

    /// Write both files, if a store is attached.
    pub fn save(&self) -> Result<()> {
        let Some(files) = &self.store else {
            return Ok(());
        };
        let main = MainFile {
            dtgbeg: Some(self.dtg_begin),
            dtg: Some(self.dtg_current),
            dtgend: Some(self.dtg_end),
        };
        let pp = PpFile {
            dtgpp: Some(self.dtg_pp),
        };
        write_atomic(&files.main, toml::to_string(&main)?.as_bytes())?;
        write_atomic(&files.pp, toml::to_string(&pp)?.as_bytes())?;
        Ok(())
    }

    /// Start of the window a cycle with interval `fcint` should see.
    pub fn dtgbeg_for(&self, fcint_hours: u32) -> Dtg {
        match self.dtg_current.sub_hours(i64::from(fcint_hours)) {
            Ok(prev) if prev >= self.dtg_begin => self.dtg_begin,
            _ => self.dtg_current,
        }
    }

    /// End of the window a cycle with interval `fcint` should see.
    pub fn dtgend_for(&self, fcint_hours: u32) -> Dtg {
        match self.dtg_current.add_hours(i64::from(fcint_hours)) {
            Ok(next) if next <= self.dtg_end => self.dtg_end,
            _ => self.dtg_current,
        }
    }

    /// Shell-sourceable view of the window.
    pub fn to_shell(&self) -> String {
        let mut out = String::new();
        for (key, dtg) in [
            ("DTG", self.dtg_current),
            ("DTGBEG", self.dtg_begin),
            ("DTGEND", self.dtg_end),
            ("DTGPP", self.dtg_pp),
        ] {
            let _ = writeln!(out, "export {key}={dtg}");
        }
        out
    }

    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_shell().as_bytes())?;
        debug!(path = ?path, "exported progress");
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if !(self.dtg_begin <= self.dtg_current && self.dtg_current <= self.dtg_end) {
            return Err(ExpError::ProgressCorrupt(format!(
                "expected DTGBEG <= DTG <= DTGEND, got {} / {} / {}",
                self.dtg_begin, self.dtg_current, self.dtg_end
            )));
        }
        if self.dtg_pp > self.dtg_end {
            return Err(ExpError::ProgressCorrupt(format!(
                "DTGPP {} is after DTGEND {}",
                self.dtg_pp, self.dtg_end
            )));
        }
        Ok(())
    }
}

fn read_toml<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let text = fs::read_to_string(path)?;
    toml::from_str(&text)
        .map_err(|e| ExpError::ProgressCorrupt(format!("{}: {e}", path.display())))
}

fn read_pp(path: &Path) -> Result<Option<Dtg>> {
    if !path.is_file() {
        return Ok(None);
    }
    let pp: PpFile = read_toml(path)?;
    Ok(pp.dtgpp)
}
