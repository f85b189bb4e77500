use crate::decision_engine::{WeightedScore, DEFAULT_NEIGHBOR_STEP_MULTIPLIERS};
use crate::math_utils::{RoundingMode, RoundingPolicy};
use crate::models::BucketUnit;
use crate::trade_lifecycle::TradeIdSource;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Every key read by `EngineRuntimeSettings`; the process environment may
/// override any of them.
pub const SETTING_KEYS: &[&str] = &[
    "SIMULATION_BUCKET_UNIT",
    "ROUNDING_SCALE",
    "ROUNDING_MODE",
    "TRADE_ID_SOURCE",
    "DECISION_PROFIT_WEIGHT",
    "DECISION_WIN_RATE_WEIGHT",
    "DECISION_DRAWDOWN_WEIGHT",
    "DECISION_WORKERS",
    "NEIGHBOR_STEP_MULTIPLIERS",
];

const MAX_ROUNDING_SCALE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRuntimeSettings {
    pub bucket_unit: BucketUnit,
    pub rounding: RoundingPolicy,
    pub trade_ids: TradeIdSource,
    pub score_weights: WeightedScore,
    pub decision_workers: usize,
    pub neighbor_step_multipliers: Vec<f64>,
}

impl Default for EngineRuntimeSettings {
    fn default() -> Self {
        Self {
            bucket_unit: BucketUnit::Day,
            rounding: RoundingPolicy::default(),
            trade_ids: TradeIdSource::Sequential,
            score_weights: WeightedScore::default(),
            decision_workers: std::cmp::max(1, num_cpus::get()),
            neighbor_step_multipliers: DEFAULT_NEIGHBOR_STEP_MULTIPLIERS.to_vec(),
        }
    }
}

impl EngineRuntimeSettings {
    /// Parses the settings map. Absent keys take their defaults; present
    /// keys must be valid.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let bucket_unit = match optional_setting(settings, "SIMULATION_BUCKET_UNIT") {
            Some(raw) => BucketUnit::parse(raw)
                .map_err(|e| anyhow!("Setting SIMULATION_BUCKET_UNIT is invalid: {}", e))?,
            None => defaults.bucket_unit,
        };
        let scale = match optional_setting(settings, "ROUNDING_SCALE") {
            Some(_) => {
                let scale = require_setting_usize(settings, "ROUNDING_SCALE", 0)?;
                if scale > MAX_ROUNDING_SCALE {
                    return Err(anyhow!(
                        "Setting ROUNDING_SCALE must be <= {} (value: {})",
                        MAX_ROUNDING_SCALE,
                        scale
                    ));
                }
                scale as u32
            }
            None => defaults.rounding.scale,
        };
        let mode = match optional_setting(settings, "ROUNDING_MODE") {
            Some(raw) => RoundingMode::parse(raw)?,
            None => defaults.rounding.mode,
        };
        let trade_ids = match optional_setting(settings, "TRADE_ID_SOURCE") {
            Some(raw) => parse_trade_id_source(raw)?,
            None => defaults.trade_ids,
        };

        let score_weights = WeightedScore {
            profit: setting_f64_or(
                settings,
                "DECISION_PROFIT_WEIGHT",
                defaults.score_weights.profit,
            )?,
            win_rate: setting_f64_or(
                settings,
                "DECISION_WIN_RATE_WEIGHT",
                defaults.score_weights.win_rate,
            )?,
            drawdown: setting_f64_or(
                settings,
                "DECISION_DRAWDOWN_WEIGHT",
                defaults.score_weights.drawdown,
            )?,
        };

        let decision_workers = match optional_setting(settings, "DECISION_WORKERS") {
            Some(_) => require_setting_usize(settings, "DECISION_WORKERS", 1)?,
            None => defaults.decision_workers,
        };
        let neighbor_step_multipliers = match optional_setting(settings, "NEIGHBOR_STEP_MULTIPLIERS") {
            Some(_) => require_setting_f64_list(settings, "NEIGHBOR_STEP_MULTIPLIERS")?,
            None => defaults.neighbor_step_multipliers,
        };

        Ok(Self {
            bucket_unit,
            rounding: RoundingPolicy::new(scale, mode),
            trade_ids,
            score_weights,
            decision_workers,
            neighbor_step_multipliers,
        })
    }

    /// Snapshot settings overlaid with any matching environment variables.
    pub fn from_settings_and_env(settings: &HashMap<String, String>) -> Result<Self> {
        Self::from_settings_map(&overlay_environment(settings, |key| std::env::var(key).ok()))
    }
}

/// Copies `settings`, replacing every known key that `lookup` can resolve.
pub fn overlay_environment<F>(settings: &HashMap<String, String>, lookup: F) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = settings.clone();
    for key in SETTING_KEYS {
        if let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) {
            merged.insert((*key).to_string(), value);
        }
    }
    merged
}

fn parse_trade_id_source(raw: &str) -> Result<TradeIdSource> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sequential" => Ok(TradeIdSource::Sequential),
        "random" | "uuid" => Ok(TradeIdSource::Random),
        other => Err(anyhow!(
            "TRADE_ID_SOURCE must be sequential or random (value: {})",
            other
        )),
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    let value = settings.get(key)?.trim();
    (!value.is_empty()).then_some(value)
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

/// Parses a finite number out of a setting value.
fn parse_finite(key: &str, raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err(anyhow!("Setting {} must be finite (value: {})", key, raw)),
        Err(_) => Err(anyhow!("Setting {} must be a number (value: {})", key, raw)),
    }
}

fn setting_f64_or(settings: &HashMap<String, String>, key: &str, default: f64) -> Result<f64> {
    if optional_setting(settings, key).is_none() {
        return Ok(default);
    }
    require_setting_f64(settings, key, Some(0.0), None)
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = parse_finite(key, raw)?;
    if min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max) {
        return Err(anyhow!(
            "Setting {} is out of range [{}, {}] (value: {})",
            key,
            min.map_or("-inf".to_string(), |min| min.to_string()),
            max.map_or("inf".to_string(), |max| max.to_string()),
            raw
        ));
    }
    Ok(value)
}

fn require_setting_usize(settings: &HashMap<String, String>, key: &str, min: usize) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = parse_finite(key, raw)?;
    if value.fract() != 0.0 || value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be a whole number >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

/// Comma or whitespace separated numbers, optionally wrapped in brackets.
fn require_setting_f64_list(settings: &HashMap<String, String>, key: &str) -> Result<Vec<f64>> {
    let raw = require_setting(settings, key)?;
    let values = raw
        .trim_matches(|c| c == '[' || c == ']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let value = parse_finite(key, part)?;
            if value == 0.0 {
                return Err(anyhow!("Setting {} must not contain zero (value: {})", key, raw));
            }
            Ok(value)
        })
        .collect::<Result<Vec<f64>>>()?;

    if values.is_empty() {
        return Err(anyhow!("Setting {} must list at least one number", key));
    }
    Ok(values)
}
