use crate::bar_utils::{bucket_end, bucket_keys};
use crate::error::EngineError;
use crate::models::{BucketUnit, PriceBar};
use crate::series::AggregatedPriceSeries;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Descriptive statistics of the bars inside one calendar bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    pub bucket_start: NaiveDate,
    pub bucket_end: NaiveDate,
    pub bar_count: usize,
    pub session_count: usize,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub net_change: f64,
    pub mean_range: f64,
    pub range_std_dev: f64,
    pub bullish_bars: usize,
    pub bearish_bars: usize,
    pub doji_bars: usize,
}

impl BucketMetadata {
    fn from_bars(bucket_start: NaiveDate, bucket_end: NaiveDate, sessions: usize, bars: &[PriceBar]) -> Self {
        let open = bars.first().map(|bar| bar.open);
        let close = bars.last().map(|bar| bar.close);
        let high = bars.iter().map(|bar| bar.high).reduce(f64::max);
        let low = bars.iter().map(|bar| bar.low).reduce(f64::min);
        let ranges: Vec<f64> = bars.iter().map(PriceBar::range).collect();

        Self {
            bucket_start,
            bucket_end,
            bar_count: bars.len(),
            session_count: sessions,
            open,
            close,
            high,
            low,
            net_change: match (open, close) {
                (Some(open), Some(close)) => close - open,
                _ => 0.0,
            },
            mean_range: if ranges.is_empty() {
                0.0
            } else {
                ranges.iter().mean()
            },
            // sample deviation needs two observations
            range_std_dev: if ranges.len() < 2 {
                0.0
            } else {
                ranges.iter().std_dev()
            },
            bullish_bars: bars.iter().filter(|bar| bar.is_bullish()).count(),
            bearish_bars: bars.iter().filter(|bar| bar.is_bearish()).count(),
            doji_bars: bars.iter().filter(|bar| bar.is_doji()).count(),
        }
    }
}

/// Metadata for every bucket of `[start, end)`, in ascending bucket order.
pub fn compute_metadata(
    series: &AggregatedPriceSeries,
    start: NaiveDate,
    end: NaiveDate,
    unit: BucketUnit,
) -> Result<Vec<BucketMetadata>, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidDateRange { start, end });
    }

    let metadata = bucket_keys(start, end, unit)
        .into_par_iter()
        .map(|key| {
            let until = bucket_end(key, unit, end);
            let from = key.max(start);
            let sessions = series.sessions_between(from, until).count();
            let bars = series.bars_between(from, until);
            BucketMetadata::from_bars(key, until, sessions, &bars)
        })
        .collect();
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeInterval;
    use crate::series::SeriesProvenance;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(d: NaiveDate, hour: u32, o: f64, h: f64, l: f64, c: f64) -> PriceBar {
        PriceBar::new(d.and_hms_opt(hour, 0, 0).unwrap(), TimeInterval::OneHour, o, h, l, c)
    }

    #[test]
    fn metadata_describes_each_bucket() {
        let bars = vec![
            bar(date(2024, 1, 30), 10, 100.0, 104.0, 98.0, 103.0),
            bar(date(2024, 1, 31), 10, 103.0, 106.0, 100.0, 101.0),
            bar(date(2024, 1, 31), 11, 101.0, 103.0, 99.0, 101.1),
            bar(date(2024, 2, 1), 10, 101.0, 110.0, 100.0, 109.0),
        ];
        let series = AggregatedPriceSeries::aggregate_by_date(
            bars,
            SeriesProvenance::new("test", "ES", TimeInterval::OneHour),
        )
        .unwrap();

        let metadata = compute_metadata(&series, date(2024, 1, 15), date(2024, 3, 1), BucketUnit::Month).unwrap();
        assert_eq!(metadata.len(), 2);

        let january = &metadata[0];
        assert_eq!(january.bucket_start, date(2024, 1, 1));
        assert_eq!(january.bar_count, 3);
        assert_eq!(january.session_count, 2);
        assert_eq!(january.open, Some(100.0));
        assert_eq!(january.close, Some(101.1));
        assert_eq!(january.high, Some(106.0));
        assert_eq!(january.low, Some(98.0));
        assert!((january.net_change - 1.1).abs() < 1e-9);
        assert!((january.mean_range - 16.0 / 3.0).abs() < 1e-9);
        assert!(january.range_std_dev > 0.0);
        assert_eq!(january.bullish_bars, 2);
        assert_eq!(january.bearish_bars, 1);
        assert_eq!(january.doji_bars, 1);

        let february = &metadata[1];
        assert_eq!(february.bar_count, 1);
        assert_eq!(february.range_std_dev, 0.0);
    }

    #[test]
    fn empty_buckets_have_no_prices() {
        let series = AggregatedPriceSeries::aggregate_by_date(
            Vec::new(),
            SeriesProvenance::new("test", "ES", TimeInterval::OneHour),
        )
        .unwrap();
        let metadata = compute_metadata(&series, date(2024, 1, 1), date(2024, 1, 3), BucketUnit::Day).unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[0].open, None);
        assert_eq!(metadata[0].net_change, 0.0);
        assert!(compute_metadata(&series, date(2024, 1, 3), date(2024, 1, 3), BucketUnit::Day).is_err());
    }
}
