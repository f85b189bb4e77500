use crate::error::EngineError;
use crate::models::*;
use crate::parameters::{StrategyParameters, BLOOM_TEMPLATE, FIXED_RANGE_TEMPLATE, SPROUT_TEMPLATE};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// What a strategy wants to open, before exit levels are attached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub direction: TradeDirection,
    pub price: f64,
    pub size: f64,
    pub time: NaiveDateTime,
    /// Bar the exit levels are measured from.
    pub signal_bar: PriceBar,
    /// Filled inside the entry bar, so that bar's range is checked right away.
    pub intrabar: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Per-variant entry and exit rules. Implementations hold no run state, so one
/// instance can be shared by every worker evaluating candidates.
pub trait StrategyBehavior: Send + Sync {
    fn get_template_id(&self) -> &str;

    /// `bars` is the whole chronological feed of the run and `index` the bar
    /// being processed; only `bars[..=index]` may be inspected.
    fn evaluate_entry(
        &self,
        bars: &[PriceBar],
        index: usize,
        params: &StrategyParameters,
    ) -> Result<Option<EntrySignal>, EngineError>;

    fn compute_exit_levels(
        &self,
        entry: &EntrySignal,
        params: &StrategyParameters,
    ) -> Result<ExitLevels, EngineError>;

    fn uses_entry_window(&self) -> bool {
        true
    }

    fn max_entries_per_day(&self, _params: &StrategyParameters) -> Option<usize> {
        None
    }

    /// Bars on which any open position is closed at the bar's open.
    fn is_forced_exit(&self, _bar: &PriceBar, _params: &StrategyParameters) -> bool {
        false
    }

    /// Price that, once reached in the trade's favour, moves the stop to entry.
    fn break_even_trigger(
        &self,
        _entry: &EntrySignal,
        _levels: &ExitLevels,
        _params: &StrategyParameters,
    ) -> Option<f64> {
        None
    }
}

#[path = "strategies/fixed_range.rs"]
pub mod fixed_range;

pub use fixed_range::FixedRangeStrategy;

#[path = "strategies/bloom.rs"]
pub mod bloom;

pub use bloom::BloomStrategy;

#[path = "strategies/sprout.rs"]
pub mod sprout;

pub use sprout::SproutStrategy;

pub fn create_strategy(template_id: &str) -> Result<Box<dyn StrategyBehavior>, EngineError> {
    match template_id {
        FIXED_RANGE_TEMPLATE => Ok(Box::new(FixedRangeStrategy::new())),
        BLOOM_TEMPLATE => Ok(Box::new(BloomStrategy::new())),
        SPROUT_TEMPLATE => Ok(Box::new(SproutStrategy::new())),
        _ => Err(EngineError::UnknownStrategy(template_id.to_string())),
    }
}

pub(crate) fn mismatched_parameters(
    template_id: &str,
    bar: &PriceBar,
    params: &StrategyParameters,
) -> EngineError {
    EngineError::StrategyConfiguration {
        timestamp: bar.timestamp,
        reason: format!(
            "{} strategy received {} parameters",
            template_id,
            params.template_id()
        ),
    }
}
