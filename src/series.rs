use crate::bar_utils::{group_bars_by_date, validate_bar};
use crate::error::EngineError;
use crate::models::{PriceBar, TimeInterval};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a series came from. Carried through so results can be traced back
/// to their feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesProvenance {
    pub source: String,
    pub symbol: String,
    pub interval: TimeInterval,
}

impl SeriesProvenance {
    pub fn new(source: &str, symbol: &str, interval: TimeInterval) -> Self {
        Self {
            source: source.to_string(),
            symbol: symbol.to_string(),
            interval,
        }
    }
}

/// Bars grouped by calendar date, sorted and duplicate free. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPriceSeries {
    provenance: SeriesProvenance,
    by_date: BTreeMap<NaiveDate, Vec<PriceBar>>,
}

impl AggregatedPriceSeries {
    /// Builds the series, failing on the first malformed bar.
    pub fn aggregate_by_date<I>(bars: I, provenance: SeriesProvenance) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = PriceBar>,
    {
        let bars: Vec<PriceBar> = bars.into_iter().collect();
        for bar in &bars {
            validate_bar(bar, provenance.interval)?;
        }

        Ok(Self {
            by_date: group_bars_by_date(bars),
            provenance,
        })
    }

    /// Builds the series from the valid bars only and hands back what was dropped.
    pub fn aggregate_lenient<I>(bars: I, provenance: SeriesProvenance) -> (Self, Vec<EngineError>)
    where
        I: IntoIterator<Item = PriceBar>,
    {
        let mut dropped = Vec::new();
        let mut valid = Vec::new();
        for bar in bars {
            match validate_bar(&bar, provenance.interval) {
                Ok(()) => valid.push(bar),
                Err(err) => dropped.push(err),
            }
        }

        if !dropped.is_empty() {
            warn!(
                "Dropped {} malformed bar(s) from {} {}",
                dropped.len(),
                provenance.source,
                provenance.symbol
            );
        }

        (
            Self {
                by_date: group_bars_by_date(valid),
                provenance,
            },
            dropped,
        )
    }

    pub fn provenance(&self) -> &SeriesProvenance {
        &self.provenance
    }

    pub fn interval(&self) -> TimeInterval {
        self.provenance.interval
    }

    pub fn bars_on(&self, date: NaiveDate) -> &[PriceBar] {
        self.by_date
            .get(&date)
            .map(|bars| bars.as_slice())
            .unwrap_or(&[])
    }

    /// Trading sessions with at least one bar in `[start, end)`.
    pub fn sessions_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = (&NaiveDate, &Vec<PriceBar>)> {
        let upper = if end > start { end } else { start };
        self.by_date.range(start..upper)
    }

    /// All bars in `[start, end)` in chronological order.
    pub fn bars_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
        self.sessions_between(start, end)
            .flat_map(|(_, bars)| bars.iter().copied())
            .collect()
    }

    /// Every bar in chronological order.
    pub fn bars(&self) -> impl Iterator<Item = &PriceBar> {
        self.by_date.values().flat_map(|bars| bars.iter())
    }

    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.by_date.keys()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.by_date.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.by_date.keys().next_back().copied()
    }

    pub fn bar_count(&self) -> usize {
        self.by_date.values().map(|bars| bars.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily(day: u32, open: f64, high: f64, low: f64, close: f64) -> PriceBar {
        let ts = NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        PriceBar::new(ts, TimeInterval::OneDay, open, high, low, close)
    }

    fn provenance() -> SeriesProvenance {
        SeriesProvenance::new("test", "ES", TimeInterval::OneDay)
    }

    #[test]
    fn aggregates_unsorted_input() {
        let series = AggregatedPriceSeries::aggregate_by_date(
            vec![
                daily(3, 92.0, 95.0, 80.0, 85.0),
                daily(1, 100.0, 110.0, 95.0, 105.0),
                daily(2, 105.0, 108.0, 90.0, 92.0),
            ],
            provenance(),
        )
        .unwrap();

        assert_eq!(series.bar_count(), 3);
        assert_eq!(series.first_date(), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(series.last_date(), NaiveDate::from_ymd_opt(2024, 1, 3));
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        assert_eq!(series.sessions_between(start, end).count(), 2);
        assert_eq!(series.bars_between(start, end)[0].open, 105.0);
    }

    #[test]
    fn strict_aggregation_rejects_negative_prices() {
        let err = AggregatedPriceSeries::aggregate_by_date(
            vec![daily(1, -1.0, 110.0, 0.0, 105.0)],
            provenance(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::MalformedBar { .. }));
    }

    #[test]
    fn lenient_aggregation_drops_only_bad_bars() {
        let (series, dropped) = AggregatedPriceSeries::aggregate_lenient(
            vec![
                daily(1, 100.0, 110.0, 95.0, 105.0),
                daily(2, f64::NAN, 108.0, 90.0, 92.0),
                daily(3, 92.0, 95.0, 80.0, 85.0),
            ],
            provenance(),
        );
        assert_eq!(dropped.len(), 1);
        assert_eq!(series.bar_count(), 2);
        assert!(series
            .bars_on(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
            .is_empty());
    }
}
