use crate::math_utils::RoundingPolicy;
use crate::parameters::StrategyParameters;
use anyhow::{anyhow, Result as AnyResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeInterval {
    OneMinute,
    FiveMinute,
    TenMinute,
    FifteenMinute,
    ThirtyMinute,
    OneHour,
    FourHour,
    OneDay,
    OneWeek,
    OneMonth,
    OneYear,
}

impl TimeInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInterval::OneMinute => "1m",
            TimeInterval::FiveMinute => "5m",
            TimeInterval::TenMinute => "10m",
            TimeInterval::FifteenMinute => "15m",
            TimeInterval::ThirtyMinute => "30m",
            TimeInterval::OneHour => "1h",
            TimeInterval::FourHour => "4h",
            TimeInterval::OneDay => "1d",
            TimeInterval::OneWeek => "1w",
            TimeInterval::OneMonth => "1mo",
            TimeInterval::OneYear => "1y",
        }
    }

    pub fn parse(raw: &str) -> AnyResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1m" | "one_minute" => Ok(Self::OneMinute),
            "5m" | "five_minute" => Ok(Self::FiveMinute),
            "10m" | "ten_minute" => Ok(Self::TenMinute),
            "15m" | "fifteen_minute" => Ok(Self::FifteenMinute),
            "30m" | "thirty_minute" => Ok(Self::ThirtyMinute),
            "1h" | "one_hour" => Ok(Self::OneHour),
            "4h" | "four_hour" => Ok(Self::FourHour),
            "1d" | "one_day" => Ok(Self::OneDay),
            "1w" | "one_week" => Ok(Self::OneWeek),
            "1mo" | "one_month" => Ok(Self::OneMonth),
            "1y" | "one_year" => Ok(Self::OneYear),
            other => Err(anyhow!("Unknown time interval: {}", other)),
        }
    }

    /// Nominal length of the interval. Months and years use 30 and 365 days.
    pub fn minutes(&self) -> i64 {
        match self {
            TimeInterval::OneMinute => 1,
            TimeInterval::FiveMinute => 5,
            TimeInterval::TenMinute => 10,
            TimeInterval::FifteenMinute => 15,
            TimeInterval::ThirtyMinute => 30,
            TimeInterval::OneHour => 60,
            TimeInterval::FourHour => 240,
            TimeInterval::OneDay => 1_440,
            TimeInterval::OneWeek => 10_080,
            TimeInterval::OneMonth => 43_200,
            TimeInterval::OneYear => 525_600,
        }
    }
}

/// One OHLC observation. Identity is `(timestamp, interval)`; prices do not
/// participate in equality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: NaiveDateTime,
    pub interval: TimeInterval,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl PriceBar {
    pub fn new(
        timestamp: NaiveDateTime,
        interval: TimeInterval,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self {
            timestamp,
            interval,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.timestamp.time()
    }

    /// Full size of the bar, wick to wick.
    pub fn range(&self) -> f64 {
        (self.high - self.low).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Body no larger than 10% of the range.
    pub fn is_doji(&self) -> bool {
        let range = self.range();
        if range <= f64::EPSILON {
            return true;
        }
        (self.close - self.open).abs() / range <= 0.10
    }

    /// True when the two bars' ranges do not overlap at all.
    pub fn is_mutually_exclusive(&self, other: &PriceBar) -> bool {
        self.low > other.high || self.high < other.low
    }

    pub fn has_bullish_indication(&self) -> bool {
        self.close >= self.low + self.range() / 2.0
    }

    pub fn has_bearish_indication(&self) -> bool {
        self.close <= self.low + self.range() / 2.0
    }
}

impl PartialEq for PriceBar {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.interval == other.interval
    }
}

impl Eq for PriceBar {}

impl Hash for PriceBar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.timestamp.hash(state);
        self.interval.hash(state);
    }
}

impl PartialOrd for PriceBar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriceBar {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.interval.cmp(&other.interval))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            TradeDirection::Long => 1.0,
            TradeDirection::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    BreakEven,
    ForcedExit,
    EndOfRange,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::BreakEven => "break_even",
            ExitReason::ForcedExit => "forced_exit",
            ExitReason::EndOfRange => "end_of_range",
        }
    }
}

/// A finished trade. Two trades are only equal when they share an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub id: String,
    pub direction: TradeDirection,
    pub size: f64,
    pub open_time: NaiveDateTime,
    pub close_time: NaiveDateTime,
    pub open_price: f64,
    pub close_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_reason: ExitReason,
    pub synthetic: bool,
}

impl ClosedTrade {
    /// Signed price delta oriented by direction.
    pub fn points(&self, rounding: &RoundingPolicy) -> f64 {
        rounding.apply((self.close_price - self.open_price) * self.direction.sign())
    }

    pub fn profit(&self, price_per_point: f64, rounding: &RoundingPolicy) -> f64 {
        rounding.apply(self.points(rounding) * price_per_point)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.close_time - self.open_time).num_minutes()
    }
}

impl PartialEq for ClosedTrade {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClosedTrade {}

/// Running totals after one more trade within a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeReportEntry {
    pub cumulative_points: f64,
    pub cumulative_profit: f64,
    pub trade_count: usize,
    pub trade_id: String,
    pub direction: TradeDirection,
    pub open_time: NaiveDateTime,
    pub close_time: NaiveDateTime,
    pub points: f64,
    pub profit: f64,
    pub exit_reason: ExitReason,
    pub synthetic: bool,
}

impl CumulativeReportEntry {
    /// Folds `trade` onto the totals carried by `previous` (or onto zero).
    pub fn next(
        previous: Option<&CumulativeReportEntry>,
        trade: &ClosedTrade,
        price_per_point: f64,
        rounding: &RoundingPolicy,
    ) -> Self {
        let (points_so_far, profit_so_far, count_so_far) = previous
            .map(|entry| {
                (
                    entry.cumulative_points,
                    entry.cumulative_profit,
                    entry.trade_count,
                )
            })
            .unwrap_or((0.0, 0.0, 0));
        let points = trade.points(rounding);
        let profit = trade.profit(price_per_point, rounding);

        Self {
            cumulative_points: rounding.apply(points_so_far + points),
            cumulative_profit: rounding.apply(profit_so_far + profit),
            trade_count: count_so_far + 1,
            trade_id: trade.id.clone(),
            direction: trade.direction,
            open_time: trade.open_time,
            close_time: trade.close_time,
            points,
            profit,
            exit_reason: trade.exit_reason,
            synthetic: trade.synthetic,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.close_time - self.open_time).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketUnit {
    Day,
    Month,
    Year,
}

impl BucketUnit {
    pub fn parse(raw: &str) -> AnyResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" | "days" | "daily" => Ok(Self::Day),
            "month" | "months" | "monthly" => Ok(Self::Month),
            "year" | "years" | "yearly" => Ok(Self::Year),
            other => Err(anyhow!("Bucket unit must be day, month or year (value: {})", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub trade_count: usize,
    pub hits: usize,
    pub misses: usize,
    pub net_points: f64,
    pub net_profit: f64,
    pub scaled_net_profit: Option<f64>,
    pub points_gained: f64,
    pub points_lost: f64,
    pub profitability: f64,
    pub retention: f64,
    pub win_percentage: f64,
    pub daily_win_percentage: f64,
    pub max_drawdown: f64,
    pub relative_drawdown: f64,
    pub average_trade_duration_minutes: f64,
    pub synthetic_closes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketFailure {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketResult {
    pub bucket_start: NaiveDate,
    pub bucket_end: NaiveDate,
    pub parameters: Option<StrategyParameters>,
    pub trades: Vec<ClosedTrade>,
    pub entries: Vec<CumulativeReportEntry>,
    pub summary: BucketSummary,
    pub failure: Option<BucketFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub strategy_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub unit: BucketUnit,
    pub seed_parameters: Option<StrategyParameters>,
    pub buckets: BTreeMap<NaiveDate, BucketResult>,
    pub summary: BucketSummary,
}

impl SimulationResult {
    pub fn bucket(&self, start: NaiveDate) -> Option<&BucketResult> {
        self.buckets.get(&start)
    }

    pub fn total_trades(&self) -> usize {
        self.summary.trade_count
    }

    /// Every closed trade across all buckets, in bucket then close order.
    pub fn trades(&self) -> impl Iterator<Item = &ClosedTrade> {
        self.buckets.values().flat_map(|bucket| bucket.trades.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&NaiveDate, &BucketFailure)> {
        self.buckets
            .iter()
            .filter_map(|(date, bucket)| bucket.failure.as_ref().map(|failure| (date, failure)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    pub fn parse(raw: &str) -> AnyResult<Self> {
        let parts: Vec<&str> = raw.split(':').map(|part| part.trim()).collect();
        if parts.len() != 3 {
            return Err(anyhow!("Range must look like min:max:step (value: {})", raw));
        }
        let parse_part = |value: &str| {
            value
                .parse::<f64>()
                .map_err(|_| anyhow!("Range bound is not a number: {}", value))
        };
        let range = Self {
            min: parse_part(parts[0])?,
            max: parse_part(parts[1])?,
            step: parse_part(parts[2])?,
        };
        if !(range.min.is_finite() && range.max.is_finite() && range.step.is_finite()) {
            return Err(anyhow!("Range values must be finite (value: {})", raw));
        }
        if range.max < range.min || range.step <= 0.0 {
            return Err(anyhow!(
                "Range requires min <= max and step > 0 (value: {})",
                raw
            ));
        }
        Ok(range)
    }

    /// Every value `min + k * step` up to and including `max`.
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::new();
        let mut k = 0u32;
        loop {
            let value = self.min + f64::from(k) * self.step;
            if value > self.max + 1e-9 {
                break;
            }
            values.push(value.min(self.max));
            k += 1;
        }
        values
    }
}

/// A candidate configuration, its simulated outcome and its ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub index: usize,
    pub parameters: StrategyParameters,
    pub result: SimulationResult,
    pub score: f64,
}

impl Decision {
    pub fn max_drawdown(&self) -> f64 {
        self.result.summary.max_drawdown
    }

    pub fn has_trades(&self) -> bool {
        self.result.total_trades() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn bars_compare_by_timestamp_and_interval_only() {
        let a = PriceBar::new(at(9, 30), TimeInterval::ThirtyMinute, 1.0, 2.0, 0.5, 1.5);
        let b = PriceBar::new(at(9, 30), TimeInterval::ThirtyMinute, 9.0, 9.0, 9.0, 9.0);
        let c = PriceBar::new(at(10, 0), TimeInterval::ThirtyMinute, 1.0, 2.0, 0.5, 1.5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn mutually_exclusive_bars_do_not_overlap() {
        let a = PriceBar::new(at(9, 30), TimeInterval::ThirtyMinute, 10.0, 12.0, 9.0, 11.0);
        let b = PriceBar::new(at(10, 0), TimeInterval::ThirtyMinute, 13.0, 15.0, 12.5, 14.0);
        let c = PriceBar::new(at(10, 30), TimeInterval::ThirtyMinute, 11.0, 13.0, 11.5, 12.0);
        assert!(a.is_mutually_exclusive(&b));
        assert!(!a.is_mutually_exclusive(&c));
    }

    #[test]
    fn short_trade_points_are_oriented_by_direction() {
        let rounding = RoundingPolicy::default();
        let trade = ClosedTrade {
            id: "t1".to_string(),
            direction: TradeDirection::Short,
            size: 1.0,
            open_time: at(10, 0),
            close_time: at(11, 0),
            open_price: 100.0,
            close_price: 92.5,
            stop_loss: 105.0,
            take_profit: 92.5,
            exit_reason: ExitReason::TakeProfit,
            synthetic: false,
        };
        assert!((trade.points(&rounding) - 7.5).abs() < 1e-9);
        assert!((trade.profit(2.0, &rounding) - 15.0).abs() < 1e-9);
        assert_eq!(trade.duration_minutes(), 60);
    }

    #[test]
    fn parameter_range_enumerates_inclusive_values() {
        let range = ParameterRange::parse("0.5:1.5:0.5").unwrap();
        assert_eq!(range.values(), vec![0.5, 1.0, 1.5]);
        assert!(ParameterRange::parse("2:1:1").is_err());
        assert!(ParameterRange::parse("1:2").is_err());
    }

    #[test]
    fn bucket_unit_parses_aliases() {
        assert_eq!(BucketUnit::parse("Daily").unwrap(), BucketUnit::Day);
        assert_eq!(BucketUnit::parse("months").unwrap(), BucketUnit::Month);
        assert!(BucketUnit::parse("week").is_err());
    }
}
