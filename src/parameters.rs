use crate::error::EngineError;
use crate::math_utils::RoundingPolicy;
use crate::models::TradeDirection;
use crate::param_utils::{finite_param, flag_value, get_flag_param, get_param_f64, get_param_usize, rounded_param};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FIXED_RANGE_TEMPLATE: &str = "fixed_range";
pub const BLOOM_TEMPLATE: &str = "bloom";
pub const SPROUT_TEMPLATE: &str = "sprout";

const BASE_KEYS: &[&str] = &[
    "lotSize",
    "pricePerPoint",
    "initialBalance",
    "startHour",
    "startMinute",
    "endHour",
    "endMinute",
    "scaleProfits",
    "buyStopLoss",
    "buyTakeProfit",
    "sellStopLoss",
    "sellTakeProfit",
];
const FIXED_RANGE_KEYS: &[&str] = &["side"];
const BLOOM_KEYS: &[&str] = &["variance", "normalize", "breakEvenStop", "absoluteProfitTarget"];
const SPROUT_KEYS: &[&str] = &[
    "profitMultiplier",
    "allowableRisk",
    "allowableReward",
    "minimumRisk",
    "minimumReward",
    "variance",
    "maxTradesPerDay",
];

/// Stop-loss and take-profit distances, in points, for one trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitParameter {
    pub stop_loss: f64,
    pub take_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicParameters {
    pub description: String,
    pub lot_size: f64,
    pub price_per_point: f64,
    pub initial_balance: f64,
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: Option<u32>,
    pub end_minute: Option<u32>,
    pub scale_profits: bool,
    pub buy_limit: LimitParameter,
    pub sell_limit: LimitParameter,
    pub rounding: RoundingPolicy,
}

impl Default for BasicParameters {
    fn default() -> Self {
        Self {
            description: String::new(),
            lot_size: 0.25,
            price_per_point: 5.6,
            initial_balance: 30_000.0,
            start_hour: 9,
            start_minute: 30,
            end_hour: None,
            end_minute: None,
            scale_profits: false,
            buy_limit: LimitParameter {
                stop_loss: 10.0,
                take_profit: 20.0,
            },
            sell_limit: LimitParameter {
                stop_loss: 10.0,
                take_profit: 20.0,
            },
            rounding: RoundingPolicy::default(),
        }
    }
}

impl BasicParameters {
    pub fn window_start(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.start_hour, self.start_minute, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn window_end(&self) -> Option<NaiveTime> {
        let hour = self.end_hour?;
        NaiveTime::from_hms_opt(hour, self.end_minute.unwrap_or(0), 0)
    }

    /// Entry window check: `start <= time`, and `time < end` when an end is set.
    pub fn entry_window_contains(&self, time: NaiveTime) -> bool {
        if time < self.window_start() {
            return false;
        }
        match self.window_end() {
            Some(end) => time < end,
            None => true,
        }
    }

    pub fn limit_for(&self, direction: TradeDirection) -> &LimitParameter {
        match direction {
            TradeDirection::Long => &self.buy_limit,
            TradeDirection::Short => &self.sell_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum VariantParameters {
    FixedRange {
        side: TradeDirection,
    },
    #[serde(rename_all = "camelCase")]
    Bloom {
        variance: f64,
        normalize: bool,
        break_even_stop: bool,
        absolute_profit_target: f64,
    },
    #[serde(rename_all = "camelCase")]
    Sprout {
        profit_multiplier: f64,
        /// Stored and reported with the parameter set; exits never read it.
        /// The stop always sits inside the signal bar (see `variance`).
        allowable_risk: f64,
        allowable_reward: f64,
        /// Stored and reported like `allowable_risk`; exits never read it.
        minimum_risk: f64,
        minimum_reward: f64,
        variance: f64,
        max_trades_per_day: usize,
    },
}

impl VariantParameters {
    pub fn template_id(&self) -> &'static str {
        match self {
            VariantParameters::FixedRange { .. } => FIXED_RANGE_TEMPLATE,
            VariantParameters::Bloom { .. } => BLOOM_TEMPLATE,
            VariantParameters::Sprout { .. } => SPROUT_TEMPLATE,
        }
    }
}

/// Base sizing/window settings plus the knobs of one strategy variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParameters {
    pub base: BasicParameters,
    pub variant: VariantParameters,
}

impl StrategyParameters {
    pub fn template_id(&self) -> &'static str {
        self.variant.template_id()
    }

    pub fn with_rounding(mut self, rounding: RoundingPolicy) -> Self {
        self.base.rounding = rounding;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.base.description = description.to_string();
        self
    }

    /// Builds a parameter set from a camelCase map. Missing keys take the
    /// template defaults; unknown keys are rejected.
    pub fn from_parameters(
        template_id: &str,
        params: &HashMap<String, f64>,
    ) -> Result<Self, EngineError> {
        let variant_keys = match template_id {
            FIXED_RANGE_TEMPLATE => FIXED_RANGE_KEYS,
            BLOOM_TEMPLATE => BLOOM_KEYS,
            SPROUT_TEMPLATE => SPROUT_KEYS,
            other => return Err(EngineError::UnknownStrategy(other.to_string())),
        };

        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            if !BASE_KEYS.contains(&key.as_str()) && !variant_keys.contains(&key.as_str()) {
                return Err(EngineError::invalid_parameter(
                    key,
                    format!("not a {} parameter", template_id),
                ));
            }
            if !params[key].is_finite() {
                return Err(EngineError::invalid_parameter(key, "value must be finite"));
            }
        }

        let base = base_from_parameters(template_id, params)?;
        let variant = match template_id {
            FIXED_RANGE_TEMPLATE => {
                let side = match rounded_param(params, "side").unwrap_or(1) {
                    1 => TradeDirection::Long,
                    -1 => TradeDirection::Short,
                    other => {
                        return Err(EngineError::invalid_parameter(
                            "side",
                            format!("expected 1 (long) or -1 (short), got {}", other),
                        ))
                    }
                };
                VariantParameters::FixedRange { side }
            }
            BLOOM_TEMPLATE => VariantParameters::Bloom {
                variance: non_negative(params, "variance", 1.0)?,
                normalize: get_flag_param(params, "normalize", true),
                break_even_stop: get_flag_param(params, "breakEvenStop", false),
                absolute_profit_target: non_negative(params, "absoluteProfitTarget", 30.0)?,
            },
            _ => {
                let minimum_reward = non_negative(params, "minimumReward", 40.0)?;
                let allowable_reward = non_negative(params, "allowableReward", 85.0)?;
                if minimum_reward > allowable_reward {
                    return Err(EngineError::invalid_parameter(
                        "minimumReward",
                        "must not exceed allowableReward",
                    ));
                }
                VariantParameters::Sprout {
                    profit_multiplier: non_negative(params, "profitMultiplier", 2.0)?,
                    allowable_risk: non_negative(params, "allowableRisk", 60.0)?,
                    allowable_reward,
                    minimum_risk: non_negative(params, "minimumRisk", 25.0)?,
                    minimum_reward,
                    variance: non_negative(params, "variance", 0.05)?,
                    max_trades_per_day: get_param_usize(params, "maxTradesPerDay", 3),
                }
            }
        };

        Ok(Self { base, variant })
    }

    /// Flattens back to the camelCase map accepted by `from_parameters`.
    pub fn to_parameters(&self) -> HashMap<String, f64> {
        let base = &self.base;
        let mut params = HashMap::new();
        params.insert("lotSize".to_string(), base.lot_size);
        params.insert("pricePerPoint".to_string(), base.price_per_point);
        params.insert("initialBalance".to_string(), base.initial_balance);
        params.insert("startHour".to_string(), f64::from(base.start_hour));
        params.insert("startMinute".to_string(), f64::from(base.start_minute));
        if let Some(end_hour) = base.end_hour {
            params.insert("endHour".to_string(), f64::from(end_hour));
            params.insert(
                "endMinute".to_string(),
                f64::from(base.end_minute.unwrap_or(0)),
            );
        }
        params.insert("scaleProfits".to_string(), flag_value(base.scale_profits));
        params.insert("buyStopLoss".to_string(), base.buy_limit.stop_loss);
        params.insert("buyTakeProfit".to_string(), base.buy_limit.take_profit);
        params.insert("sellStopLoss".to_string(), base.sell_limit.stop_loss);
        params.insert("sellTakeProfit".to_string(), base.sell_limit.take_profit);

        match &self.variant {
            VariantParameters::FixedRange { side } => {
                params.insert("side".to_string(), side.sign());
            }
            VariantParameters::Bloom {
                variance,
                normalize,
                break_even_stop,
                absolute_profit_target,
            } => {
                params.insert("variance".to_string(), *variance);
                params.insert("normalize".to_string(), flag_value(*normalize));
                params.insert("breakEvenStop".to_string(), flag_value(*break_even_stop));
                params.insert("absoluteProfitTarget".to_string(), *absolute_profit_target);
            }
            VariantParameters::Sprout {
                profit_multiplier,
                allowable_risk,
                allowable_reward,
                minimum_risk,
                minimum_reward,
                variance,
                max_trades_per_day,
            } => {
                params.insert("profitMultiplier".to_string(), *profit_multiplier);
                params.insert("allowableRisk".to_string(), *allowable_risk);
                params.insert("allowableReward".to_string(), *allowable_reward);
                params.insert("minimumRisk".to_string(), *minimum_risk);
                params.insert("minimumReward".to_string(), *minimum_reward);
                params.insert("variance".to_string(), *variance);
                params.insert("maxTradesPerDay".to_string(), *max_trades_per_day as f64);
            }
        }

        params
    }
}

fn base_from_parameters(
    template_id: &str,
    params: &HashMap<String, f64>,
) -> Result<BasicParameters, EngineError> {
    let defaults = BasicParameters::default();

    let lot_size = get_param_f64(params, "lotSize", defaults.lot_size);
    if lot_size <= 0.0 {
        return Err(EngineError::invalid_parameter("lotSize", "must be > 0"));
    }

    let start_hour = bounded_u32(params, "startHour", defaults.start_hour, 23)?;
    let start_minute = bounded_u32(params, "startMinute", defaults.start_minute, 59)?;
    let end_hour = match finite_param(params, "endHour") {
        Some(_) => Some(bounded_u32(params, "endHour", 0, 24)?),
        None => None,
    };
    let end_minute = match finite_param(params, "endMinute") {
        Some(_) => Some(bounded_u32(params, "endMinute", 0, 59)?),
        None => None,
    };
    if end_hour == Some(24) && end_minute.unwrap_or(0) != 0 {
        return Err(EngineError::invalid_parameter("endMinute", "must be 0 when endHour is 24"));
    }

    Ok(BasicParameters {
        description: template_id.to_string(),
        lot_size,
        price_per_point: non_negative(params, "pricePerPoint", defaults.price_per_point)?,
        initial_balance: non_negative(params, "initialBalance", defaults.initial_balance)?,
        start_hour,
        start_minute,
        // 24:00 means "until the end of the session"
        end_hour: end_hour.filter(|hour| *hour < 24),
        end_minute: end_hour
            .filter(|hour| *hour < 24)
            .map(|_| end_minute.unwrap_or(0)),
        scale_profits: get_flag_param(params, "scaleProfits", defaults.scale_profits),
        buy_limit: LimitParameter {
            stop_loss: non_negative(params, "buyStopLoss", defaults.buy_limit.stop_loss)?,
            take_profit: non_negative(params, "buyTakeProfit", defaults.buy_limit.take_profit)?,
        },
        sell_limit: LimitParameter {
            stop_loss: non_negative(params, "sellStopLoss", defaults.sell_limit.stop_loss)?,
            take_profit: non_negative(params, "sellTakeProfit", defaults.sell_limit.take_profit)?,
        },
        rounding: defaults.rounding,
    })
}

fn non_negative(params: &HashMap<String, f64>, key: &str, default: f64) -> Result<f64, EngineError> {
    let value = get_param_f64(params, key, default);
    if value < 0.0 {
        return Err(EngineError::invalid_parameter(key, format!("must be >= 0 (value: {})", value)));
    }
    Ok(value)
}

fn bounded_u32(
    params: &HashMap<String, f64>,
    key: &str,
    default: u32,
    max: u32,
) -> Result<u32, EngineError> {
    match rounded_param(params, key) {
        None => Ok(default),
        Some(value) if value >= 0 && value <= i64::from(max) => Ok(value as u32),
        Some(value) => Err(EngineError::invalid_parameter(
            key,
            format!("must be between 0 and {} (value: {})", max, value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn sprout_defaults_match_harness_values() {
        let params = StrategyParameters::from_parameters(SPROUT_TEMPLATE, &HashMap::new()).unwrap();
        assert_eq!(params.template_id(), SPROUT_TEMPLATE);
        assert!((params.base.lot_size - 0.25).abs() < 1e-9);
        assert!((params.base.price_per_point - 5.6).abs() < 1e-9);
        match params.variant {
            VariantParameters::Sprout {
                profit_multiplier,
                allowable_reward,
                minimum_reward,
                variance,
                max_trades_per_day,
                ..
            } => {
                assert_eq!(profit_multiplier, 2.0);
                assert_eq!(allowable_reward, 85.0);
                assert_eq!(minimum_reward, 40.0);
                assert_eq!(variance, 0.05);
                assert_eq!(max_trades_per_day, 3);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn map_conversion_round_trips() {
        let original = map(&[
            ("variance", 1.1),
            ("normalize", 0.0),
            ("breakEvenStop", 1.0),
            ("startHour", 10.0),
            ("startMinute", 5.0),
            ("endHour", 15.0),
        ]);
        let params = StrategyParameters::from_parameters(BLOOM_TEMPLATE, &original).unwrap();
        let rebuilt =
            StrategyParameters::from_parameters(BLOOM_TEMPLATE, &params.to_parameters()).unwrap();
        assert_eq!(params, rebuilt);
        assert_eq!(params.base.window_end(), NaiveTime::from_hms_opt(15, 0, 0));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let unknown = StrategyParameters::from_parameters(BLOOM_TEMPLATE, &map(&[("side", 1.0)]));
        assert!(matches!(unknown, Err(EngineError::InvalidParameter { .. })));

        let negative =
            StrategyParameters::from_parameters(SPROUT_TEMPLATE, &map(&[("variance", -0.1)]));
        assert!(negative.is_err());

        let bad_hour =
            StrategyParameters::from_parameters(FIXED_RANGE_TEMPLATE, &map(&[("startHour", 25.0)]));
        assert!(bad_hour.is_err());

        let unknown_template = StrategyParameters::from_parameters("tulip", &HashMap::new());
        assert_eq!(
            unknown_template.unwrap_err(),
            EngineError::UnknownStrategy("tulip".to_string())
        );
    }

    #[test]
    fn entry_window_is_half_open() {
        let params = StrategyParameters::from_parameters(
            FIXED_RANGE_TEMPLATE,
            &map(&[("startHour", 9.0), ("startMinute", 30.0), ("endHour", 16.0)]),
        )
        .unwrap();
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(!params.base.entry_window_contains(t(9, 29)));
        assert!(params.base.entry_window_contains(t(9, 30)));
        assert!(params.base.entry_window_contains(t(15, 59)));
        assert!(!params.base.entry_window_contains(t(16, 0)));
    }
}
