pub mod metadata;
pub mod optimize;
pub mod simulate;

use crate::data_context::MarketData;
use crate::math_utils::RoundingPolicy;
use crate::models::{BucketUnit, ParameterRange, SimulationResult};
use crate::optimizer_status::OptimizerStatus;
use crate::parameters::StrategyParameters;
use crate::resolver::{ParameterSchedule, ParameterSource};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Inputs shared by every command that runs simulations.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub template_id: String,
    pub data_file: PathBuf,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub unit: Option<BucketUnit>,
    pub parameters: HashMap<String, f64>,
    pub schedule: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Parses repeated `key=value` arguments into a parameter map.
pub fn parse_parameter_overrides(raw: &[String]) -> Result<HashMap<String, f64>> {
    let mut parameters = HashMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter must look like key=value (value: {})", entry))?;
        let parsed = value
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("Parameter {} must be a number (value: {})", key.trim(), value))?;
        parameters.insert(key.trim().to_string(), parsed);
    }
    Ok(parameters)
}

/// Parses repeated `key=min:max:step` arguments, keeping their order.
pub fn parse_parameter_ranges(raw: &[String]) -> Result<Vec<(String, ParameterRange)>> {
    raw.iter()
        .map(|entry| {
            let (key, range) = entry.split_once('=').ok_or_else(|| {
                anyhow!("Range must look like key=min:max:step (value: {})", entry)
            })?;
            Ok((key.trim().to_string(), ParameterRange::parse(range)?))
        })
        .collect()
}

/// Parses `min:max` (or a single `n`) into an inclusive window range.
pub fn parse_window_range(raw: &str) -> Result<RangeInclusive<usize>> {
    let parse = |value: &str| {
        value
            .trim()
            .parse::<usize>()
            .map_err(|_| anyhow!("Window must be a whole number (value: {})", raw))
    };
    let (min, max) = match raw.split_once(':') {
        Some((min, max)) => (parse(min)?, parse(max)?),
        None => {
            let window = parse(raw)?;
            (window, window)
        }
    };
    if min == 0 || max < min {
        return Err(anyhow!("Window range must satisfy 1 <= min <= max (value: {})", raw));
    }
    Ok(min..=max)
}

pub fn load_market_data(path: &Path) -> Result<MarketData> {
    info!("Using market data snapshot from {}", path.display());
    let data = MarketData::load_from_file(path, &OptimizerStatus::new())?;
    if data.series().is_empty() {
        return Err(anyhow!("Market data snapshot {} has no bars", path.display()));
    }
    Ok(data)
}

/// Fixed parameters from the overrides, or the dated schedule with the
/// overrides layered onto every entry.
pub fn build_parameter_source(
    request: &RunRequest,
    rounding: RoundingPolicy,
) -> Result<ParameterSource> {
    let Some(schedule_path) = request.schedule.as_ref() else {
        let params = StrategyParameters::from_parameters(&request.template_id, &request.parameters)?
            .with_rounding(rounding);
        return Ok(ParameterSource::Fixed(params));
    };

    let loaded = ParameterSchedule::load_json(&request.template_id, schedule_path)?;
    let mut schedule = ParameterSchedule::new();
    for (effective, params) in loaded.iter() {
        let mut map = params.to_parameters();
        map.extend(request.parameters.iter().map(|(key, value)| (key.clone(), *value)));
        let params = StrategyParameters::from_parameters(&request.template_id, &map)
            .with_context(|| format!("Invalid schedule entry for {}", effective))?
            .with_rounding(rounding);
        schedule.insert(*effective, params);
    }
    info!(
        "Loaded parameter schedule with {} entries from {}",
        schedule.len(),
        schedule_path.display()
    );
    Ok(ParameterSource::Scheduled(schedule))
}

pub fn log_simulation_summary(result: &SimulationResult) {
    let summary = &result.summary;
    info!(
        "{} {} - {} by {}: {} trades, net points {:.2}, net profit {:.2}, win {:.2}%, max DD {:.2}",
        result.strategy_id,
        result.start,
        result.end,
        result.unit.label(),
        summary.trade_count,
        summary.net_points,
        summary.net_profit,
        summary.win_percentage,
        summary.max_drawdown
    );
    for (bucket, failure) in result.failures() {
        warn!("Bucket {} failed ({}): {}", bucket, failure.kind, failure.message);
    }
}

pub fn write_json_output<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Unable to create output file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).context("Failed to serialize output")?;
    writer.flush().context("Failed to flush output to disk")?;
    info!("Wrote {}", path.display());
    Ok(())
}
