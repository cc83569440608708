// src/types.rs

//! Small value types shared across the crate.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ExpError, Result};

const DTG_FORMAT: &str = "%Y%m%d%H";

/// Date-Time Group: an hour-precision UTC timestamp written `YYYYMMDDHH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dtg(NaiveDateTime);

impl Dtg {
    /// Parse a `YYYYMMDDHH` string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ExpError::ProgressCorrupt(format!(
                "invalid DTG '{s}' (expected YYYYMMDDHH)"
            )));
        }
        // chrono needs a minute field to build a NaiveDateTime.
        NaiveDateTime::parse_from_str(&format!("{s}00"), "%Y%m%d%H%M")
            .map(Dtg)
            .map_err(|e| ExpError::ProgressCorrupt(format!("invalid DTG '{s}': {e}")))
    }

    /// Build from calendar fields; `None` if the fields are not a valid hour.
    pub fn from_ymdh(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        chrono::NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .map(Dtg)
    }

    /// `self + hours`; a `Schedule` error when the result leaves chrono's range.
    pub fn add_hours(self, hours: i64) -> Result<Self> {
        Duration::try_hours(hours)
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Dtg)
            .ok_or_else(|| ExpError::Schedule(format!("{self} + {hours}h is out of range")))
    }

    pub fn sub_hours(self, hours: i64) -> Result<Self> {
        Duration::try_hours(hours)
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Dtg)
            .ok_or_else(|| ExpError::Schedule(format!("{self} - {hours}h is out of range")))
    }

    /// Whole hours from `other` to `self`.
    pub fn hours_since(self, other: Dtg) -> i64 {
        (self.0 - other.0).num_hours()
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for Dtg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DTG_FORMAT))
    }
}

impl FromStr for Dtg {
    type Err = ExpError;

    fn from_str(s: &str) -> Result<Self> {
        Dtg::parse(s)
    }
}

impl Serialize for Dtg {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dtg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Dtg::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Ensemble member id, rendered with three digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Member(pub u32);

impl Member {
    pub fn padded(&self) -> String {
        format!("{:03}", self.0)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.padded())
    }
}

/// Identifier of a concurrent run of the same experiment.
///
/// Streams share defaults but get their own lock file, progress files and
/// `SFX_EXP_LIB` root, all suffixed with the stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stream(String);

impl Stream {
    pub fn new(id: impl Into<String>) -> Self {
        Stream(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append the stream id (if any) to a base name.
pub fn with_stream_suffix(base: &str, stream: Option<&Stream>) -> String {
    match stream {
        Some(s) => format!("{base}{s}"),
        None => base.to_string(),
    }
}

/// Which suite layout `start_exp` should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SuiteKind {
    Surfex,
    Testbed,
}

impl FromStr for SuiteKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "surfex" => Ok(SuiteKind::Surfex),
            "testbed" => Ok(SuiteKind::Testbed),
            other => Err(format!(
                "invalid suite: {other} (expected \"surfex\" or \"testbed\")"
            )),
        }
    }
}

/// Terminal state a task can be forced into on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ForceState {
    Complete,
    Aborted,
}

impl ForceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForceState::Complete => "complete",
            ForceState::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtg_round_trips_through_string() {
        let dtg = Dtg::parse("2024030106").unwrap();
        assert_eq!(dtg.to_string(), "2024030106");
        assert_eq!(dtg.hour(), 6);
    }

    #[test]
    fn dtg_wraps_day_month_and_year_at_midnight() {
        let dtg = Dtg::parse("2023123121").unwrap();
        assert_eq!(dtg.add_hours(3).unwrap().to_string(), "2024010100");

        let leap = Dtg::parse("2024022821").unwrap();
        assert_eq!(leap.add_hours(3).unwrap().to_string(), "2024022900");
    }

    #[test]
    fn dtg_arithmetic_out_of_range_is_an_error() {
        let dtg = Dtg::parse("2024010100").unwrap();
        assert!(matches!(dtg.add_hours(i64::MAX), Err(ExpError::Schedule(_))));
        assert!(matches!(dtg.sub_hours(i64::MAX), Err(ExpError::Schedule(_))));
        assert!(dtg.add_hours(i64::from(u32::MAX)).is_err());
    }

    #[test]
    fn dtg_rejects_malformed_input() {
        assert!(matches!(Dtg::parse("202403"), Err(ExpError::ProgressCorrupt(_))));
        assert!(matches!(Dtg::parse("2024023006"), Err(ExpError::ProgressCorrupt(_))));
        assert!(matches!(Dtg::parse("20240301x6"), Err(ExpError::ProgressCorrupt(_))));
    }

    #[test]
    fn member_is_zero_padded() {
        assert_eq!(Member(3).padded(), "003");
        assert_eq!(Member(120).to_string(), "120");
    }

    #[test]
    fn suite_kind_parses_case_insensitively() {
        assert_eq!("Surfex".parse::<SuiteKind>().unwrap(), SuiteKind::Surfex);
        assert!("nwp".parse::<SuiteKind>().is_err());
    }
}
