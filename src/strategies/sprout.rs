use crate::error::EngineError;
use crate::math_utils::calculate_limit;
use crate::models::*;
use crate::parameters::{StrategyParameters, VariantParameters, SPROUT_TEMPLATE};
use crate::strategy::{mismatched_parameters, EntrySignal, ExitLevels};
use crate::strategy_utils::{clamp_reward, is_bar_at, stop_entry, within_session};
use chrono::{NaiveTime, Timelike};

const SESSION_OPEN: (u32, u32) = (9, 30);
const SESSION_CLOSE: (u32, u32) = (16, 30);
const EXIT_HOUR: u32 = 16;

/// Three-bar breakout. A signal bar that undercuts (overshoots) the bar before
/// it and is then broken to the upside (downside) by the current bar opens a
/// stop entry at the signal bar's extreme.
pub struct SproutStrategy {
    template_id: String,
}

impl SproutStrategy {
    pub fn new() -> Self {
        Self {
            template_id: SPROUT_TEMPLATE.to_string(),
        }
    }

    fn session_window() -> (NaiveTime, NaiveTime) {
        (
            NaiveTime::from_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(SESSION_CLOSE.0, SESSION_CLOSE.1, 0).unwrap_or(NaiveTime::MIN),
        )
    }

    fn signal(
        reference: &PriceBar,
        signal: &PriceBar,
        current: &PriceBar,
    ) -> Option<TradeDirection> {
        // no new trades in the closing hour
        if current.time().hour() == EXIT_HOUR {
            return None;
        }

        if current.is_mutually_exclusive(signal) || signal.is_mutually_exclusive(reference) {
            return None;
        }

        if signal.low < reference.low
            && current.high > signal.high
            && current.low > signal.low
            && signal.has_bullish_indication()
        {
            Some(TradeDirection::Long)
        } else if signal.high > reference.high
            && current.low < signal.low
            && current.high < signal.high
            && signal.has_bearish_indication()
        {
            Some(TradeDirection::Short)
        } else {
            None
        }
    }
}

impl Default for SproutStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl super::StrategyBehavior for SproutStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn evaluate_entry(
        &self,
        bars: &[PriceBar],
        index: usize,
        params: &StrategyParameters,
    ) -> Result<Option<EntrySignal>, EngineError> {
        let Some(current) = bars.get(index) else {
            return Ok(None);
        };
        if !matches!(params.variant, VariantParameters::Sprout { .. }) {
            return Err(mismatched_parameters(&self.template_id, current, params));
        }

        let (open, close) = Self::session_window();
        if index < 2 || !within_session(current.time(), open, close) {
            return Ok(None);
        }

        let reference = &bars[index - 2];
        let signal = &bars[index - 1];
        if reference.date() != current.date() || signal.date() != current.date() {
            return Ok(None);
        }

        Ok(Self::signal(reference, signal, current).map(|direction| {
            let price = match direction {
                TradeDirection::Long => signal.high,
                TradeDirection::Short => signal.low,
            };
            stop_entry(direction, price, current, signal, params.base.lot_size)
        }))
    }

    fn compute_exit_levels(
        &self,
        entry: &EntrySignal,
        params: &StrategyParameters,
    ) -> Result<ExitLevels, EngineError> {
        let VariantParameters::Sprout {
            profit_multiplier,
            allowable_reward,
            minimum_reward,
            variance,
            ..
        } = params.variant
        else {
            return Err(mismatched_parameters(&self.template_id, &entry.signal_bar, params));
        };

        let rounding = &params.base.rounding;
        let range = entry.signal_bar.range();
        let offset = range * variance;
        let reward = clamp_reward(range * profit_multiplier, minimum_reward, allowable_reward);

        // the stop sits just inside the signal bar's far extreme
        let levels = match entry.direction {
            TradeDirection::Long => ExitLevels {
                stop_loss: rounding.apply(entry.signal_bar.low + offset),
                take_profit: calculate_limit(entry.price, reward, true, rounding),
            },
            TradeDirection::Short => ExitLevels {
                stop_loss: rounding.apply(entry.signal_bar.high - offset),
                take_profit: calculate_limit(entry.price, reward, false, rounding),
            },
        };
        Ok(levels)
    }

    fn uses_entry_window(&self) -> bool {
        false
    }

    fn max_entries_per_day(&self, params: &StrategyParameters) -> Option<usize> {
        match params.variant {
            VariantParameters::Sprout {
                max_trades_per_day, ..
            } => Some(max_trades_per_day),
            _ => None,
        }
    }

    fn is_forced_exit(&self, bar: &PriceBar, _params: &StrategyParameters) -> bool {
        is_bar_at(bar, EXIT_HOUR, 0)
    }
}
