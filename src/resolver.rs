use crate::error::EngineError;
use crate::parameters::StrategyParameters;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Date-keyed parameter table with day, month and year lookup tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchedule {
    entries: BTreeMap<NaiveDate, StrategyParameters>,
}

impl ParameterSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, effective: NaiveDate, params: StrategyParameters) {
        self.entries.insert(effective, params);
    }

    pub fn with_entry(mut self, effective: NaiveDate, params: StrategyParameters) -> Self {
        self.insert(effective, params);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &StrategyParameters)> {
        self.entries.iter()
    }

    pub fn exact(&self, target: NaiveDate) -> Option<&StrategyParameters> {
        self.entries.get(&target)
    }

    pub fn monthly(&self, target: NaiveDate) -> Option<&StrategyParameters> {
        target
            .with_day(1)
            .and_then(|first_of_month| self.entries.get(&first_of_month))
    }

    pub fn yearly(&self, target: NaiveDate) -> Option<&StrategyParameters> {
        NaiveDate::from_ymd_opt(target.year(), 1, 1)
            .and_then(|first_of_year| self.entries.get(&first_of_year))
    }

    /// Most specific entry wins: the exact date, then the first of the month,
    /// then the first of the year.
    pub fn resolve(&self, target: NaiveDate) -> Result<&StrategyParameters, EngineError> {
        if self.entries.is_empty() {
            return Err(EngineError::EmptyConfiguration);
        }

        self.exact(target)
            .or_else(|| self.monthly(target))
            .or_else(|| self.yearly(target))
            .ok_or(EngineError::NoParameterConfiguration { date: target })
    }

    /// Builds a schedule from `{"YYYY-MM-DD": {camelCase params}}` maps.
    pub fn from_parameter_maps(
        template_id: &str,
        maps: &BTreeMap<NaiveDate, HashMap<String, f64>>,
    ) -> Result<Self, EngineError> {
        let mut schedule = Self::new();
        for (effective, params) in maps {
            schedule.insert(
                *effective,
                StrategyParameters::from_parameters(template_id, params)?,
            );
        }
        Ok(schedule)
    }

    pub fn load_json(template_id: &str, path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open parameter schedule {}", path.display()))?;
        let maps: BTreeMap<NaiveDate, HashMap<String, f64>> =
            serde_json::from_reader(BufReader::new(file))
                .context("Parameter schedule decode failed")?;
        let schedule = Self::from_parameter_maps(template_id, &maps)?;
        Ok(schedule)
    }
}

/// Parameters for a run: one set for every bucket, or a dated schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSource {
    Fixed(StrategyParameters),
    Scheduled(ParameterSchedule),
}

impl ParameterSource {
    pub fn resolve(&self, target: NaiveDate) -> Result<&StrategyParameters, EngineError> {
        match self {
            ParameterSource::Fixed(params) => Ok(params),
            ParameterSource::Scheduled(schedule) => schedule.resolve(target),
        }
    }
}

impl From<StrategyParameters> for ParameterSource {
    fn from(params: StrategyParameters) -> Self {
        ParameterSource::Fixed(params)
    }
}

impl From<ParameterSchedule> for ParameterSource {
    fn from(schedule: ParameterSchedule) -> Self {
        ParameterSource::Scheduled(schedule)
    }
}
