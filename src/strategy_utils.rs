use crate::models::{PriceBar, TradeDirection};
use crate::strategy::EntrySignal;
use chrono::{NaiveTime, Timelike};

/// Signal filled at the bar's open, checked against the same bar's range.
pub fn open_entry(direction: TradeDirection, bar: &PriceBar, size: f64) -> EntrySignal {
    stop_entry(direction, bar.open, bar, bar, size)
}

/// Signal filled at `price` inside `bar`, with exits measured from `signal_bar`.
pub fn stop_entry(
    direction: TradeDirection,
    price: f64,
    bar: &PriceBar,
    signal_bar: &PriceBar,
    size: f64,
) -> EntrySignal {
    EntrySignal {
        direction,
        price,
        size,
        time: bar.timestamp,
        signal_bar: *signal_bar,
        intrabar: true,
    }
}

/// True when the bar starts exactly at `hour:minute`.
pub fn is_bar_at(bar: &PriceBar, hour: u32, minute: u32) -> bool {
    bar.time().hour() == hour && bar.time().minute() == minute
}

/// Strictly between the session bounds.
pub fn within_session(time: NaiveTime, open: NaiveTime, close: NaiveTime) -> bool {
    time > open && time < close
}

/// Direction of the opening gap from `previous` into `current`.
pub fn gap_direction(previous: &PriceBar, current: &PriceBar) -> Option<TradeDirection> {
    if current.open > previous.close {
        Some(TradeDirection::Long)
    } else if current.open < previous.close {
        Some(TradeDirection::Short)
    } else {
        None
    }
}

/// Clamps a profit window between the minimum and the allowable reward.
pub fn clamp_reward(window: f64, minimum: f64, allowable: f64) -> f64 {
    if window < minimum {
        minimum
    } else if window > allowable {
        allowable
    } else {
        window
    }
}
