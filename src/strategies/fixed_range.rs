use crate::error::EngineError;
use crate::math_utils::calculate_limit;
use crate::models::*;
use crate::parameters::{StrategyParameters, VariantParameters, FIXED_RANGE_TEMPLATE};
use crate::strategy::{mismatched_parameters, EntrySignal, ExitLevels};
use crate::strategy_utils::open_entry;

/// Opens one position per session at the open of the first bar inside the
/// entry window, with fixed point distances to the stop and target.
pub struct FixedRangeStrategy {
    template_id: String,
}

impl FixedRangeStrategy {
    pub fn new() -> Self {
        Self {
            template_id: FIXED_RANGE_TEMPLATE.to_string(),
        }
    }
}

impl Default for FixedRangeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl super::StrategyBehavior for FixedRangeStrategy {
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
        let VariantParameters::FixedRange { side } = params.variant else {
            return Err(mismatched_parameters(&self.template_id, bar, params));
        };

        Ok(Some(open_entry(side, bar, params.base.lot_size)))
    }

    fn compute_exit_levels(
        &self,
        entry: &EntrySignal,
        params: &StrategyParameters,
    ) -> Result<ExitLevels, EngineError> {
        let limit = params.base.limit_for(entry.direction);
        let rounding = &params.base.rounding;
        let long = entry.direction == TradeDirection::Long;

        Ok(ExitLevels {
            stop_loss: calculate_limit(entry.price, limit.stop_loss, !long, rounding),
            take_profit: calculate_limit(entry.price, limit.take_profit, long, rounding),
        })
    }

    fn max_entries_per_day(&self, _params: &StrategyParameters) -> Option<usize> {
        Some(1)
    }
}
