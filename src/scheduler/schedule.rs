// src/scheduler/schedule.rs

use std::collections::BTreeSet;

use crate::config::Configuration;
use crate::config::validate::validate_hours;
use crate::errors::{ExpError, Result};
use crate::types::Dtg;

/// Sorted, unique cycle hours of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastCycleSchedule {
    hours: Vec<u32>,
}

impl ForecastCycleSchedule {
    pub fn new(hours: impl IntoIterator<Item = u32>) -> Result<Self> {
        let set: BTreeSet<u32> = hours.into_iter().collect();
        if let Some(bad) = set.iter().find(|h| **h > 23) {
            return Err(ExpError::Schedule(format!("cycle hour {bad} is outside 0..=23")));
        }
        if set.is_empty() {
            return Err(ExpError::Schedule("no cycle hours configured".to_string()));
        }
        Ok(Self {
            hours: set.into_iter().collect(),
        })
    }

    /// Union of `general.hh_list` over the master tree and every member.
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        let master = config.general()?;
        validate_hours(&master)?;
        let mut hours: Vec<u32> = master.hh_list;
        for member in config.members()? {
            let general = config.general_for_member(member)?;
            validate_hours(&general)?;
            hours.extend(general.hh_list);
        }
        Self::new(hours)
    }

    pub fn hours(&self) -> &[u32] {
        &self.hours
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.hours.binary_search(&hour).is_ok()
    }

    /// Hours from cycle `hour` to the next scheduled cycle, wrapping over
    /// midnight. A single cycle per day gives 24.
    pub fn interval_at(&self, hour: u32) -> Result<u32> {
        let pos = self.hours.binary_search(&hour).map_err(|_| {
            ExpError::Schedule(format!(
                "cycle hour {hour:02} is not in the schedule {:?}",
                self.hours
            ))
        })?;
        let interval = match self.hours.get(pos + 1) {
            Some(next) => next - hour,
            None => self.hours[0] + 24 - hour,
        };
        Ok(interval)
    }

    pub fn next_dtg(&self, dtg: Dtg) -> Result<Dtg> {
        let fcint = self.interval_at(dtg.hour())?;
        dtg.add_hours(i64::from(fcint))
    }
}
