use crate::error::EngineError;
use crate::models::{BucketUnit, PriceBar, TimeInterval};
use chrono::{Datelike, Months, NaiveDate};
use std::collections::BTreeMap;

/// Checks a bar for the invariants every downstream component relies on.
pub fn validate_bar(bar: &PriceBar, expected_interval: TimeInterval) -> Result<(), EngineError> {
    let malformed = |reason: String| EngineError::MalformedBar {
        timestamp: bar.timestamp,
        reason,
    };

    for (label, value) in [
        ("open", bar.open),
        ("high", bar.high),
        ("low", bar.low),
        ("close", bar.close),
    ] {
        if !value.is_finite() {
            return Err(malformed(format!("{} is not finite", label)));
        }
        if value < 0.0 {
            return Err(malformed(format!("{} is negative ({})", label, value)));
        }
    }

    if let Some(volume) = bar.volume {
        if !volume.is_finite() || volume < 0.0 {
            return Err(malformed(format!("volume must be >= 0 (value: {})", volume)));
        }
    }

    if bar.high < bar.open.max(bar.close) {
        return Err(malformed(format!(
            "high {} is below max(open, close)",
            bar.high
        )));
    }
    if bar.low > bar.open.min(bar.close) {
        return Err(malformed(format!(
            "low {} is above min(open, close)",
            bar.low
        )));
    }

    if bar.interval != expected_interval {
        return Err(malformed(format!(
            "interval {} does not match series interval {}",
            bar.interval.as_str(),
            expected_interval.as_str()
        )));
    }

    Ok(())
}

/// Groups bars by calendar date. Within a date, bars are ordered by timestamp
/// and a later duplicate replaces an earlier one.
pub fn group_bars_by_date<I>(bars: I) -> BTreeMap<NaiveDate, Vec<PriceBar>>
where
    I: IntoIterator<Item = PriceBar>,
{
    let mut keyed: BTreeMap<NaiveDate, BTreeMap<PriceBar, PriceBar>> = BTreeMap::new();
    for bar in bars {
        keyed.entry(bar.date()).or_default().insert(bar, bar);
    }

    keyed
        .into_iter()
        .map(|(date, bars)| (date, bars.into_values().collect()))
        .collect()
}

/// Start of the calendar bucket containing `date`.
pub fn bucket_floor(date: NaiveDate, unit: BucketUnit) -> NaiveDate {
    match unit {
        BucketUnit::Day => date,
        BucketUnit::Month => date.with_day(1).unwrap_or(date),
        BucketUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
    }
}

/// Start of the bucket after the one that starts at `bucket_start`.
pub fn next_bucket(bucket_start: NaiveDate, unit: BucketUnit) -> Option<NaiveDate> {
    match unit {
        BucketUnit::Day => bucket_start.succ_opt(),
        BucketUnit::Month => bucket_start.checked_add_months(Months::new(1)),
        BucketUnit::Year => bucket_start.checked_add_months(Months::new(12)),
    }
}

/// Bucket keys covering every date in `[start, end)`, ascending.
pub fn bucket_keys(start: NaiveDate, end: NaiveDate, unit: BucketUnit) -> Vec<NaiveDate> {
    let mut keys = Vec::new();
    if start >= end {
        return keys;
    }

    let mut current = bucket_floor(start, unit);
    while current < end {
        keys.push(current);
        match next_bucket(current, unit) {
            Some(next) => current = next,
            None => break,
        }
    }
    keys
}

/// Exclusive end of the bucket starting at `bucket_start`, clipped to `range_end`.
pub fn bucket_end(bucket_start: NaiveDate, unit: BucketUnit, range_end: NaiveDate) -> NaiveDate {
    next_bucket(bucket_start, unit)
        .map(|next| next.min(range_end))
        .unwrap_or(range_end)
}
