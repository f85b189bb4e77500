use crate::commands::{load_market_data, write_json_output};
use crate::metadata::compute_metadata;
use crate::models::BucketUnit;
use anyhow::Result;
use chrono::NaiveDate;
use log::info;
use std::path::Path;

pub fn run(
    data_file: &Path,
    start: NaiveDate,
    end: NaiveDate,
    unit: Option<BucketUnit>,
    output: Option<&Path>,
) -> Result<()> {
    let data = load_market_data(data_file)?;
    let unit = unit.unwrap_or(data.runtime_settings()?.bucket_unit);
    let metadata = compute_metadata(data.series(), start, end, unit)?;

    for bucket in &metadata {
        info!(
            "{}: {} bars / {} sessions, net change {:.2}, mean range {:.2} (sd {:.2}), {} up / {} down / {} doji",
            bucket.bucket_start,
            bucket.bar_count,
            bucket.session_count,
            bucket.net_change,
            bucket.mean_range,
            bucket.range_std_dev,
            bucket.bullish_bars,
            bucket.bearish_bars,
            bucket.doji_bars
        );
    }
    if let Some(output) = output {
        write_json_output(&metadata, output)?;
    }
    Ok(())
}
