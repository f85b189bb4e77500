use crate::error::EngineError;
use crate::models::{ExitReason, PriceBar, TradeDirection};
use crate::strategy::{EntrySignal, ExitLevels};
use crate::trade_lifecycle::OpenPosition;

pub const PRICE_EPSILON: f64 = 1e-6;

/// Checks whether `bar` breaches either threshold of `position`.
///
/// When one bar spans both the stop and the target the intrabar order is
/// unknown, so the stop is assumed to fill first. Fills happen at the
/// threshold price, never at the bar close.
pub fn threshold_exit(bar: &PriceBar, position: &OpenPosition) -> Option<(f64, ExitReason)> {
    let stop_reason = if position.break_even_armed {
        ExitReason::BreakEven
    } else {
        ExitReason::StopLoss
    };

    match position.direction {
        TradeDirection::Long => {
            if bar.low <= position.stop_loss + PRICE_EPSILON {
                Some((position.stop_loss, stop_reason))
            } else if bar.high >= position.take_profit - PRICE_EPSILON {
                Some((position.take_profit, ExitReason::TakeProfit))
            } else {
                None
            }
        }
        TradeDirection::Short => {
            if bar.high >= position.stop_loss - PRICE_EPSILON {
                Some((position.stop_loss, stop_reason))
            } else if bar.low <= position.take_profit + PRICE_EPSILON {
                Some((position.take_profit, ExitReason::TakeProfit))
            } else {
                None
            }
        }
    }
}

/// Rejects setups a strategy should never produce: a non-positive or
/// non-finite size, or levels on the wrong side of the entry price.
pub fn validate_levels(entry: &EntrySignal, levels: &ExitLevels) -> Result<(), EngineError> {
    let invalid = |reason: String| EngineError::StrategyConfiguration {
        timestamp: entry.time,
        reason,
    };

    if !entry.size.is_finite() || entry.size <= 0.0 {
        return Err(invalid(format!("trade size must be > 0 (value: {})", entry.size)));
    }
    if !entry.price.is_finite() || entry.price < 0.0 {
        return Err(invalid(format!("entry price is invalid (value: {})", entry.price)));
    }
    if !levels.stop_loss.is_finite() || !levels.take_profit.is_finite() {
        return Err(invalid("stop loss and take profit must be finite".to_string()));
    }

    let ordered = match entry.direction {
        TradeDirection::Long => levels.stop_loss < entry.price && entry.price < levels.take_profit,
        TradeDirection::Short => levels.take_profit < entry.price && entry.price < levels.stop_loss,
    };
    if !ordered {
        return Err(invalid(format!(
            "{} entry at {} has stop {} and target {} on the wrong side",
            entry.direction.as_str(),
            entry.price,
            levels.stop_loss,
            levels.take_profit
        )));
    }

    Ok(())
}

/// True once the bar has traded through the break-even trigger.
pub fn break_even_reached(bar: &PriceBar, position: &OpenPosition) -> bool {
    let Some(trigger) = position.break_even_trigger else {
        return false;
    };
    if position.break_even_armed {
        return false;
    }
    match position.direction {
        TradeDirection::Long => bar.high >= trigger - PRICE_EPSILON,
        TradeDirection::Short => bar.low <= trigger + PRICE_EPSILON,
    }
}
