use crate::bar_utils::{bucket_end, bucket_floor, bucket_keys};
use crate::error::EngineError;
use crate::models::*;
use crate::optimizer_status::CancellationToken;
use crate::parameters::{BasicParameters, StrategyParameters};
use crate::performance::PerformanceCalculator;
use crate::resolver::ParameterSource;
use crate::series::AggregatedPriceSeries;
use crate::strategy::StrategyBehavior;
use crate::trade_lifecycle::{TradeIdSource, TradeLifecycle};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeMap;

struct BucketWork {
    start: NaiveDate,
    end: NaiveDate,
    parameters: Option<StrategyParameters>,
    reporting: Option<StrategyParameters>,
    trades: Vec<ClosedTrade>,
    failure: Option<BucketFailure>,
}

impl BucketWork {
    fn fail(&mut self, err: &EngineError) {
        warn!("Bucket {} failed: {}", self.start, err);
        if self.failure.is_none() {
            self.failure = Some(BucketFailure {
                kind: err.kind().to_string(),
                message: err.to_string(),
            });
        }
    }
}

/// Replays a series bar by bar through one trade lifecycle and reports the
/// closed trades per calendar bucket.
#[derive(Clone, Debug, Default)]
pub struct Simulator {
    cancellation: Option<CancellationToken>,
    trade_ids: TradeIdSource,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_trade_ids(mut self, trade_ids: TradeIdSource) -> Self {
        self.trade_ids = trade_ids;
        self
    }

    pub fn simulate(
        &self,
        series: &AggregatedPriceSeries,
        source: &ParameterSource,
        strategy: &dyn StrategyBehavior,
        start: NaiveDate,
        end: NaiveDate,
        unit: BucketUnit,
    ) -> Result<SimulationResult, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidDateRange { start, end });
        }

        let bars = series.bars_between(start, end);
        let mut lifecycle = TradeLifecycle::new(strategy, self.trade_ids);
        let mut buckets: Vec<BucketWork> = Vec::new();
        let mut seed_parameters: Option<StrategyParameters> = None;
        let mut carried: Option<StrategyParameters> = None;
        let mut cursor = 0usize;

        for key in bucket_keys(start, end, unit) {
            if self
                .cancellation
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
            {
                return Err(EngineError::Cancelled { bucket: key });
            }

            let mut work = BucketWork {
                start: key,
                end: bucket_end(key, unit, end),
                parameters: None,
                reporting: carried.clone(),
                trades: Vec::new(),
                failure: None,
            };

            match source.resolve(key) {
                Ok(params) => {
                    if seed_parameters.is_none() {
                        seed_parameters = Some(params.clone());
                    }
                    carried = Some(params.clone());
                    work.reporting = Some(params.clone());
                    work.parameters = Some(params.clone());
                }
                Err(err) => work.fail(&err),
            }

            let mut skip_rest = false;
            while cursor < bars.len() && bars[cursor].date() < work.end {
                let index = cursor;
                cursor += 1;
                if skip_rest {
                    continue;
                }

                match lifecycle.on_bar(&bars, index, work.parameters.as_ref()) {
                    Ok(Some(trade)) => work.trades.push(trade),
                    Ok(None) => {}
                    Err(err @ EngineError::StrategyConfiguration { .. }) => {
                        work.fail(&err);
                        skip_rest = true;
                    }
                    Err(err) => return Err(err),
                }
            }

            buckets.push(work);
        }

        if let Some(trade) = lifecycle.finish() {
            let key = bucket_floor(trade.close_time.date(), unit);
            if let Some(work) = buckets.iter_mut().find(|work| work.start == key) {
                work.trades.push(trade);
            }
        }

        let fallback = BasicParameters::default();
        let mut results = BTreeMap::new();
        let mut all_entries = Vec::new();
        for work in buckets {
            let base = work
                .reporting
                .as_ref()
                .map(|params| &params.base)
                .unwrap_or(&fallback);
            let entries =
                PerformanceCalculator::report_entries(&work.trades, base.price_per_point, &base.rounding);
            let summary = PerformanceCalculator::summarize(&entries, base);
            all_entries.extend(entries.iter().cloned());

            let mut trades = work.trades;
            trades.sort_by(|a, b| a.close_time.cmp(&b.close_time).then_with(|| a.id.cmp(&b.id)));

            results.insert(
                work.start,
                BucketResult {
                    bucket_start: work.start,
                    bucket_end: work.end,
                    parameters: work.parameters,
                    trades,
                    entries,
                    summary,
                    failure: work.failure,
                },
            );
        }

        all_entries.sort_by(|a, b| {
            a.close_time
                .cmp(&b.close_time)
                .then_with(|| a.trade_id.cmp(&b.trade_id))
        });
        let summary_base = seed_parameters
            .as_ref()
            .map(|params| &params.base)
            .unwrap_or(&fallback);
        let summary = PerformanceCalculator::summarize(&all_entries, summary_base);

        debug!(
            "Simulated {} from {} to {}: {} bucket(s), {} trade(s), net points {}",
            strategy.get_template_id(),
            start,
            end,
            results.len(),
            summary.trade_count,
            summary.net_points
        );

        Ok(SimulationResult {
            strategy_id: strategy.get_template_id().to_string(),
            start,
            end,
            unit,
            seed_parameters,
            buckets: results,
            summary,
        })
    }
}

/// Runs `strategy` over `[start, end)` with default simulator settings.
pub fn simulate(
    series: &AggregatedPriceSeries,
    source: &ParameterSource,
    strategy: &dyn StrategyBehavior,
    start: NaiveDate,
    end: NaiveDate,
    unit: BucketUnit,
) -> Result<SimulationResult, EngineError> {
    Simulator::new().simulate(series, source, strategy, start, end, unit)
}
