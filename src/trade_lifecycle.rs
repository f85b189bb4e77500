use crate::error::EngineError;
use crate::models::{ClosedTrade, ExitReason, PriceBar, TradeDirection};
use crate::parameters::StrategyParameters;
use crate::strategy::StrategyBehavior;
use crate::trading_rules::{break_even_reached, threshold_exit, validate_levels};
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use uuid::Uuid;

/// How closed trades are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TradeIdSource {
    /// Run-local counter; keeps repeated runs byte-identical.
    #[default]
    Sequential,
    /// Random v4 UUIDs, unique across runs.
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub id: String,
    pub direction: TradeDirection,
    pub size: f64,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub break_even_trigger: Option<f64>,
    pub break_even_armed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Watching,
    Open,
}

/// Per-run trade state. Bars must be fed in chronological order; at most one
/// position is open at any time and at most one trade closes per bar.
pub struct TradeLifecycle<'a> {
    strategy: &'a dyn StrategyBehavior,
    ids: TradeIdSource,
    next_sequence: u64,
    position: Option<OpenPosition>,
    position_params: Option<StrategyParameters>,
    session: Option<NaiveDate>,
    entries_this_session: usize,
    last_bar: Option<PriceBar>,
}

impl<'a> TradeLifecycle<'a> {
    pub fn new(strategy: &'a dyn StrategyBehavior, ids: TradeIdSource) -> Self {
        Self {
            strategy,
            ids,
            next_sequence: 1,
            position: None,
            position_params: None,
            session: None,
            entries_this_session: 0,
            last_bar: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        if self.position.is_some() {
            LifecycleState::Open
        } else {
            LifecycleState::Watching
        }
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    /// Processes `bars[index]`. `params` is `None` when no parameters apply to
    /// the bar; an open position is still managed but nothing new is opened.
    pub fn on_bar(
        &mut self,
        bars: &[PriceBar],
        index: usize,
        params: Option<&StrategyParameters>,
    ) -> Result<Option<ClosedTrade>, EngineError> {
        let Some(bar) = bars.get(index).copied() else {
            return Ok(None);
        };

        if self.session != Some(bar.date()) {
            self.session = Some(bar.date());
            self.entries_this_session = 0;
        }
        self.last_bar = Some(bar);

        if self.position.is_some() {
            return Ok(self.manage_open_position(&bar));
        }

        let Some(params) = params else {
            return Ok(None);
        };
        if self.strategy.uses_entry_window() && !params.base.entry_window_contains(bar.time()) {
            return Ok(None);
        }
        if let Some(cap) = self.strategy.max_entries_per_day(params) {
            if self.entries_this_session >= cap {
                return Ok(None);
            }
        }
        if self.strategy.is_forced_exit(&bar, params) {
            return Ok(None);
        }

        let Some(entry) = self.strategy.evaluate_entry(bars, index, params)? else {
            return Ok(None);
        };
        let levels = self.strategy.compute_exit_levels(&entry, params)?;
        validate_levels(&entry, &levels)?;
        let break_even_trigger = self.strategy.break_even_trigger(&entry, &levels, params);

        let id = self.next_id();
        debug!(
            "Opened {} {} at {} (stop {}, target {})",
            entry.direction.as_str(),
            id,
            entry.price,
            levels.stop_loss,
            levels.take_profit
        );
        let position = OpenPosition {
            id,
            direction: entry.direction,
            size: entry.size,
            entry_time: entry.time,
            entry_price: entry.price,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            break_even_trigger,
            break_even_armed: false,
        };
        self.entries_this_session += 1;

        if entry.intrabar {
            if let Some((price, reason)) = threshold_exit(&bar, &position) {
                return Ok(Some(close_position(position, &bar, price, reason, false)));
            }
        }
        self.position = Some(position);
        self.position_params = Some(params.clone());
        Ok(None)
    }

    /// Force-closes anything still open at the close of the last fed bar.
    pub fn finish(&mut self) -> Option<ClosedTrade> {
        let bar = self.last_bar?;
        let position = self.position.take()?;
        self.position_params = None;
        Some(close_position(
            position,
            &bar,
            bar.close,
            ExitReason::EndOfRange,
            true,
        ))
    }

    fn manage_open_position(&mut self, bar: &PriceBar) -> Option<ClosedTrade> {
        let forced = match &self.position_params {
            Some(params) => self.strategy.is_forced_exit(bar, params),
            None => false,
        };
        let position = self.position.as_mut()?;

        let exit = if forced {
            Some((bar.open, ExitReason::ForcedExit))
        } else {
            threshold_exit(bar, position)
        };

        if let Some((price, reason)) = exit {
            let position = self.position.take()?;
            self.position_params = None;
            return Some(close_position(position, bar, price, reason, false));
        }

        if break_even_reached(bar, position) {
            position.stop_loss = position.entry_price;
            position.break_even_armed = true;
        }
        None
    }

    fn next_id(&mut self) -> String {
        match self.ids {
            TradeIdSource::Sequential => {
                let id = format!("T{:06}", self.next_sequence);
                self.next_sequence += 1;
                id
            }
            TradeIdSource::Random => Uuid::new_v4().to_string(),
        }
    }
}

fn close_position(
    position: OpenPosition,
    bar: &PriceBar,
    price: f64,
    reason: ExitReason,
    synthetic: bool,
) -> ClosedTrade {
    ClosedTrade {
        id: position.id,
        direction: position.direction,
        size: position.size,
        open_time: position.entry_time,
        close_time: bar.timestamp,
        open_price: position.entry_price,
        close_price: price,
        stop_loss: position.stop_loss,
        take_profit: position.take_profit,
        exit_reason: reason,
        synthetic,
    }
}
