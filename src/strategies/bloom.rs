use crate::error::EngineError;
use crate::math_utils::calculate_limit;
use crate::models::*;
use crate::parameters::{LimitParameter, StrategyParameters, VariantParameters, BLOOM_TEMPLATE};
use crate::strategy::{mismatched_parameters, EntrySignal, ExitLevels};
use crate::strategy_utils::{gap_direction, is_bar_at, open_entry};

const EXIT_HOUR: u32 = 16;
const EXIT_MINUTE: u32 = 0;

/// Opening-price strategy. On the bar that starts exactly at the configured
/// start time it follows the opening gap, entering at the open with limit
/// distances scaled by `variance`. Positions are flattened at 16:00.
pub struct BloomStrategy {
    template_id: String,
}

struct BloomKnobs {
    variance: f64,
    normalize: bool,
    break_even_stop: bool,
    absolute_profit_target: f64,
}

impl BloomStrategy {
    pub fn new() -> Self {
        Self {
            template_id: BLOOM_TEMPLATE.to_string(),
        }
    }

    fn knobs(&self, bar: &PriceBar, params: &StrategyParameters) -> Result<BloomKnobs, EngineError> {
        match params.variant {
            VariantParameters::Bloom {
                variance,
                normalize,
                break_even_stop,
                absolute_profit_target,
            } => Ok(BloomKnobs {
                variance,
                normalize,
                break_even_stop,
                absolute_profit_target,
            }),
            _ => Err(mismatched_parameters(&self.template_id, bar, params)),
        }
    }

    /// Take-profit and stop-loss distances in points.
    ///
    /// With normalization on, the take profit is widened by however far the
    /// spread between this side's target and the opposite side's stop sits
    /// from the absolute profit target.
    fn distances(
        &self,
        direction: TradeDirection,
        params: &StrategyParameters,
        knobs: &BloomKnobs,
    ) -> (f64, f64) {
        let own: &LimitParameter = params.base.limit_for(direction);
        if !knobs.normalize {
            return (own.take_profit * knobs.variance, own.stop_loss * knobs.variance);
        }

        let opposite = match direction {
            TradeDirection::Long => &params.base.sell_limit,
            TradeDirection::Short => &params.base.buy_limit,
        };
        let difference = own.take_profit - opposite.stop_loss;
        let adjustment = (knobs.absolute_profit_target - difference).abs();

        (
            (own.take_profit + adjustment) * knobs.variance,
            own.stop_loss * knobs.variance,
        )
    }
}

impl Default for BloomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl super::StrategyBehavior for BloomStrategy {
    fn get_template_id(&self) -> &str {
        &self.template_id
    }

    fn evaluate_entry(
        &self,
        bars: &[PriceBar],
        index: usize,
        params: &StrategyParameters,
    ) -> Result<Option<EntrySignal>, EngineError> {
        let Some(bar) = bars.get(index) else {
            return Ok(None);
        };
        self.knobs(bar, params)?;

        if index == 0 || !is_bar_at(bar, params.base.start_hour, params.base.start_minute) {
            return Ok(None);
        }

        Ok(gap_direction(&bars[index - 1], bar)
            .map(|direction| open_entry(direction, bar, params.base.lot_size)))
    }

    fn compute_exit_levels(
        &self,
        entry: &EntrySignal,
        params: &StrategyParameters,
    ) -> Result<ExitLevels, EngineError> {
        let knobs = self.knobs(&entry.signal_bar, params)?;
        let (take_profit, stop_loss) = self.distances(entry.direction, params, &knobs);
        let rounding = &params.base.rounding;
        let long = entry.direction == TradeDirection::Long;

        Ok(ExitLevels {
            stop_loss: calculate_limit(entry.price, stop_loss, !long, rounding),
            take_profit: calculate_limit(entry.price, take_profit, long, rounding),
        })
    }

    fn max_entries_per_day(&self, _params: &StrategyParameters) -> Option<usize> {
        Some(1)
    }

    fn is_forced_exit(&self, bar: &PriceBar, _params: &StrategyParameters) -> bool {
        is_bar_at(bar, EXIT_HOUR, EXIT_MINUTE)
    }

    fn break_even_trigger(
        &self,
        entry: &EntrySignal,
        levels: &ExitLevels,
        params: &StrategyParameters,
    ) -> Option<f64> {
        let knobs = self.knobs(&entry.signal_bar, params).ok()?;
        if !knobs.break_even_stop {
            return None;
        }
        // halfway to the target
        Some(params.base.rounding.apply((entry.price + levels.take_profit) / 2.0))
    }
}
