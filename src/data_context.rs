use crate::config::{EngineRuntimeSettings, SETTING_KEYS};
use crate::models::PriceBar;
use crate::optimizer_status::OptimizerStatus;
use crate::series::{AggregatedPriceSeries, SeriesProvenance};
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

/// On-disk layout of a normalized price feed. Bars are stored flat; the
/// series is rebuilt (and re-validated) on load.
#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    provenance: SeriesProvenance,
    bars: Vec<PriceBar>,
    #[serde(default)]
    settings: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Bincode,
    Json,
}

impl SnapshotFormat {
    /// `.json` files are JSON; everything else is bincode.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Bincode,
        }
    }
}

fn scrub_snapshot_settings(settings: &HashMap<String, String>) -> HashMap<String, String> {
    settings
        .iter()
        .filter(|(key, _)| SETTING_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub struct MarketData {
    series: Arc<AggregatedPriceSeries>,
    settings: Arc<HashMap<String, String>>,
    dropped_bars: usize,
}

impl MarketData {
    /// Builds market data from raw bars, dropping malformed ones.
    pub fn from_bars(
        bars: Vec<PriceBar>,
        provenance: SeriesProvenance,
        settings: HashMap<String, String>,
    ) -> Self {
        let (series, dropped) = AggregatedPriceSeries::aggregate_lenient(bars, provenance);
        Self {
            series: Arc::new(series),
            settings: Arc::new(settings),
            dropped_bars: dropped.len(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &OptimizerStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!("Reading bars from {}", path.display()));
        let file = File::open(path)
            .with_context(|| format!("Cannot open bar snapshot {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot = match SnapshotFormat::from_path(path) {
            SnapshotFormat::Bincode => {
                bincode::deserialize_from(reader).context("Snapshot decode failed")?
            }
            SnapshotFormat::Json => {
                serde_json::from_reader(reader).context("Snapshot decode failed")?
            }
        };

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Bar snapshot {} has version {}, expected {}",
                path.display(),
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        status.set_phase("Reconstructing price series");
        let bar_count = snapshot.bars.len();
        let data = Self::from_bars(snapshot.bars, snapshot.provenance, snapshot.settings);
        if data.dropped_bars > 0 {
            warn!(
                "Dropped {} of {} bars from {} while loading",
                data.dropped_bars,
                bar_count,
                path.display()
            );
        }
        info!(
            "Loaded {} bars over {} sessions for {} ({})",
            data.series.bar_count(),
            data.series.dates().count(),
            data.series.provenance().symbol,
            data.series.interval().as_str()
        );
        Ok(data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory {}", parent.display()))?;
        }

        let file = File::create(path)
            .with_context(|| format!("Cannot create bar snapshot {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            provenance: self.series.provenance().clone(),
            bars: self.series.bars().copied().collect(),
            settings: scrub_snapshot_settings(self.settings.as_ref()),
        };
        match SnapshotFormat::from_path(path) {
            SnapshotFormat::Bincode => bincode::serialize_into(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
            SnapshotFormat::Json => serde_json::to_writer_pretty(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
        }
        writer.flush().context("Bar snapshot flush failed")?;
        Ok(())
    }

    pub fn series(&self) -> &AggregatedPriceSeries {
        self.series.as_ref()
    }

    pub fn series_arc(&self) -> Arc<AggregatedPriceSeries> {
        Arc::clone(&self.series)
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        self.settings.as_ref()
    }

    pub fn setting_value(&self, setting_key: &str) -> Option<&str> {
        self.settings
            .get(setting_key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn dropped_bars(&self) -> usize {
        self.dropped_bars
    }

    /// Snapshot settings with environment overrides applied.
    pub fn runtime_settings(&self) -> Result<EngineRuntimeSettings> {
        EngineRuntimeSettings::from_settings_and_env(self.settings.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeInterval;

    fn bars() -> Vec<PriceBar> {
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let at = |hour: u32| day.and_hms_opt(hour, 0, 0).unwrap();
        vec![
            PriceBar::new(at(10), TimeInterval::OneHour, 100.0, 102.0, 99.0, 101.0).with_volume(1200.0),
            PriceBar::new(at(11), TimeInterval::OneHour, 101.0, 103.0, 100.5, 102.5),
            // high below the close
            PriceBar::new(at(12), TimeInterval::OneHour, 102.5, 102.0, 101.0, 102.4),
        ]
    }

    fn settings() -> HashMap<String, String> {
        [
            ("ROUNDING_SCALE".to_string(), "3".to_string()),
            ("UNRELATED_SECRET".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn malformed_bars_are_dropped_on_build() {
        let data = MarketData::from_bars(
            bars(),
            SeriesProvenance::new("test", "ES", TimeInterval::OneHour),
            HashMap::new(),
        );
        assert_eq!(data.dropped_bars(), 1);
        assert_eq!(data.series().bar_count(), 2);
    }

    #[test]
    fn snapshots_survive_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let data = MarketData::from_bars(
            bars(),
            SeriesProvenance::new("test", "ES", TimeInterval::OneHour),
            settings(),
        );

        for name in ["nested/es.bin", "es.json"] {
            let path = dir.path().join(name);
            data.save_to_file(&path).unwrap();
            let loaded = MarketData::load_from_file(&path, &OptimizerStatus::new()).unwrap();
            assert_eq!(loaded.series(), data.series());
            assert_eq!(loaded.setting_value("ROUNDING_SCALE"), Some("3"));
            assert_eq!(loaded.setting_value("UNRELATED_SECRET"), None);
        }
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION + 1,
            generated_at: Utc::now(),
            provenance: SeriesProvenance::new("test", "ES", TimeInterval::OneHour),
            bars: Vec::new(),
            settings: HashMap::new(),
        };
        fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();
        let err = MarketData::load_from_file(&path, &OptimizerStatus::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains(&format!("expected {}", MARKET_DATA_SNAPSHOT_VERSION)));
    }

    #[test]
    fn missing_files_report_the_path() {
        let err = MarketData::load_from_file("/nonexistent/es.bin", &OptimizerStatus::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/es.bin"));
    }
}
