use anther::data_context::MarketData;
use anther::decision_engine::{decide, CandidateList, DecisionEngine, ParameterGrid};
use anther::models::*;
use anther::optimizer_status::{CancellationToken, OptimizerStatus};
use anther::parameters::{
    StrategyParameters, VariantParameters, BLOOM_TEMPLATE, FIXED_RANGE_TEMPLATE, SPROUT_TEMPLATE,
};
use anther::performance::PerformanceCalculator;
use anther::resolver::{ParameterSchedule, ParameterSource};
use anther::series::{AggregatedPriceSeries, SeriesProvenance};
use anther::simulation::{simulate, Simulator};
use anther::strategy::{
    create_strategy, BloomStrategy, FixedRangeStrategy, SproutStrategy, StrategyBehavior,
};
use anther::trade_lifecycle::TradeIdSource;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Once};

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn daily(d: NaiveDate, o: f64, h: f64, l: f64, c: f64) -> PriceBar {
    PriceBar::new(d.and_hms_opt(0, 0, 0).unwrap(), TimeInterval::OneDay, o, h, l, c)
}

#[allow(clippy::too_many_arguments)]
fn intraday(
    d: NaiveDate,
    hour: u32,
    minute: u32,
    interval: TimeInterval,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
) -> PriceBar {
    PriceBar::new(d.and_hms_opt(hour, minute, 0).unwrap(), interval, o, h, l, c)
}

fn series_of(bars: Vec<PriceBar>, interval: TimeInterval) -> AggregatedPriceSeries {
    AggregatedPriceSeries::aggregate_by_date(bars, SeriesProvenance::new("fixture", "ES", interval))
        .unwrap()
}

fn params(template: &str, entries: &[(&str, f64)]) -> StrategyParameters {
    let map: HashMap<String, f64> = entries
        .iter()
        .map(|(key, value)| (key.to_string(), *value))
        .collect();
    StrategyParameters::from_parameters(template, &map).unwrap()
}

/// Fixed-range parameters entering at midnight, one point per dollar.
fn daily_params(template_entries: &[(&str, f64)]) -> StrategyParameters {
    let mut entries = vec![("startHour", 0.0), ("startMinute", 0.0), ("pricePerPoint", 1.0)];
    entries.extend_from_slice(template_entries);
    params(FIXED_RANGE_TEMPLATE, &entries)
}

fn ten_point_long() -> StrategyParameters {
    daily_params(&[("buyStopLoss", 10.0), ("buyTakeProfit", 10.0)])
}

fn three_day_series() -> AggregatedPriceSeries {
    series_of(
        vec![
            daily(date(2024, 1, 1), 100.0, 110.0, 95.0, 105.0),
            daily(date(2024, 1, 2), 105.0, 108.0, 90.0, 92.0),
            daily(date(2024, 1, 3), 92.0, 95.0, 80.0, 85.0),
        ],
        TimeInterval::OneDay,
    )
}

fn run_daily(
    series: &AggregatedPriceSeries,
    params: StrategyParameters,
    start: NaiveDate,
    end: NaiveDate,
) -> SimulationResult {
    simulate(
        series,
        &ParameterSource::Fixed(params),
        &FixedRangeStrategy::new(),
        start,
        end,
        BucketUnit::Day,
    )
    .unwrap()
}

#[test]
fn three_day_long_scenario() {
    ensure_test_env();
    let result = run_daily(&three_day_series(), ten_point_long(), date(2024, 1, 1), date(2024, 1, 4));

    let first = result.bucket(date(2024, 1, 1)).unwrap();
    assert_eq!(first.trades.len(), 1);
    assert_eq!(first.trades[0].open_price, 100.0);
    assert_eq!(first.trades[0].close_price, 110.0);
    assert_eq!(first.trades[0].exit_reason, ExitReason::TakeProfit);
    assert_eq!(first.summary.net_points, 10.0);
    assert_eq!(first.summary.win_percentage, 100.0);

    let second = result.bucket(date(2024, 1, 2)).unwrap();
    assert_eq!(second.trades[0].open_price, 105.0);
    assert_eq!(second.trades[0].close_price, 95.0);
    assert_eq!(second.trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(second.summary.net_points, -10.0);
    assert_eq!(second.summary.win_percentage, 0.0);
    assert_eq!(second.summary.max_drawdown, 10.0);

    let third = result.bucket(date(2024, 1, 3)).unwrap();
    assert_eq!(third.summary.net_points, -10.0);

    assert_eq!(result.summary.trade_count, 3);
    assert_eq!(result.summary.net_points, -10.0);
    // curve 0, 10, 0, -10
    assert_eq!(result.summary.max_drawdown, 20.0);
    assert_eq!(result.summary.daily_win_percentage, 33.33);
    assert_eq!(result.seed_parameters, Some(ten_point_long()));
}

#[test]
fn repeated_runs_are_identical() {
    ensure_test_env();
    let series = three_day_series();
    let first = run_daily(&series, ten_point_long(), date(2024, 1, 1), date(2024, 1, 4));
    let second = run_daily(&series, ten_point_long(), date(2024, 1, 1), date(2024, 1, 4));
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    let random_ids = Simulator::new()
        .with_trade_ids(TradeIdSource::Random)
        .simulate(
            &series,
            &ParameterSource::Fixed(ten_point_long()),
            &FixedRangeStrategy::new(),
            date(2024, 1, 1),
            date(2024, 1, 4),
            BucketUnit::Day,
        )
        .unwrap();
    assert_eq!(random_ids.summary, first.summary);
    let ids: Vec<&str> = random_ids.trades().map(|trade| trade.id.as_str()).collect();
    assert!(ids.iter().all(|id| id.len() == 36));
}

#[test]
fn every_bucket_in_range_is_reported() {
    ensure_test_env();
    let series = three_day_series();
    let by_day = run_daily(&series, ten_point_long(), date(2023, 12, 30), date(2024, 1, 6));
    let days: Vec<NaiveDate> = by_day.buckets.keys().copied().collect();
    assert_eq!(days.len(), 7);
    assert_eq!(days[0], date(2023, 12, 30));
    assert_eq!(days[6], date(2024, 1, 5));
    let quiet = by_day.bucket(date(2024, 1, 5)).unwrap();
    assert!(quiet.entries.is_empty());
    assert_eq!(quiet.summary, BucketSummary::default());

    let by_month = simulate(
        &series,
        &ParameterSource::Fixed(ten_point_long()),
        &FixedRangeStrategy::new(),
        date(2024, 1, 15),
        date(2024, 3, 10),
        BucketUnit::Month,
    )
    .unwrap();
    let months: Vec<NaiveDate> = by_month.buckets.keys().copied().collect();
    assert_eq!(months, vec![date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]);
    // the January bars fall before the range start
    assert_eq!(by_month.summary.trade_count, 0);
    assert_eq!(by_month.bucket(date(2024, 3, 1)).unwrap().bucket_end, date(2024, 3, 10));
}

#[test]
fn schedule_resolution_prefers_the_most_specific_entry() {
    ensure_test_env();
    let with_target = |target: f64| {
        daily_params(&[("buyStopLoss", 50.0), ("buyTakeProfit", target)])
    };

    let mut schedule = ParameterSchedule::new().with_entry(date(2024, 1, 1), with_target(5.0));
    assert_eq!(schedule.resolve(date(2024, 6, 15)).unwrap(), &with_target(5.0));
    schedule.insert(date(2024, 6, 1), with_target(7.0));
    assert_eq!(schedule.resolve(date(2024, 6, 15)).unwrap(), &with_target(7.0));
    schedule.insert(date(2024, 6, 15), with_target(9.0));
    assert_eq!(schedule.resolve(date(2024, 6, 15)).unwrap(), &with_target(9.0));

    let series = series_of(
        vec![
            daily(date(2024, 5, 31), 100.0, 120.0, 99.0, 119.0),
            daily(date(2024, 6, 14), 100.0, 120.0, 99.0, 119.0),
            daily(date(2024, 6, 15), 100.0, 120.0, 99.0, 119.0),
        ],
        TimeInterval::OneDay,
    );
    let result = simulate(
        &series,
        &ParameterSource::Scheduled(schedule),
        &FixedRangeStrategy::new(),
        date(2024, 5, 31),
        date(2024, 6, 16),
        BucketUnit::Day,
    )
    .unwrap();
    assert_eq!(result.bucket(date(2024, 5, 31)).unwrap().summary.net_points, 5.0);
    assert_eq!(result.bucket(date(2024, 6, 14)).unwrap().summary.net_points, 7.0);
    assert_eq!(result.bucket(date(2024, 6, 15)).unwrap().summary.net_points, 9.0);
    assert_eq!(result.failures().count(), 0);

    let err = ParameterSchedule::new().resolve(date(2024, 6, 15)).unwrap_err();
    assert_eq!(err.kind(), "empty_configuration");
}

#[test]
fn stop_loss_wins_when_a_bar_spans_both_levels() {
    ensure_test_env();
    let series = series_of(
        vec![daily(date(2024, 1, 1), 100.0, 115.0, 85.0, 101.0)],
        TimeInterval::OneDay,
    );

    let long = run_daily(&series, ten_point_long(), date(2024, 1, 1), date(2024, 1, 2));
    let trade = long.trades().next().unwrap();
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.close_price, 90.0);
    assert_eq!(long.summary.net_points, -10.0);

    let short_params = daily_params(&[
        ("side", -1.0),
        ("sellStopLoss", 10.0),
        ("sellTakeProfit", 10.0),
    ]);
    let short = run_daily(&series, short_params, date(2024, 1, 1), date(2024, 1, 2));
    let trade = short.trades().next().unwrap();
    assert_eq!(trade.direction, TradeDirection::Short);
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.close_price, 110.0);
    assert_eq!(short.summary.net_points, -10.0);
}

#[test]
fn drawdown_is_never_negative() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let length = rng.gen_range(0..40);
        let mut running = 0.0;
        let mut curve = Vec::with_capacity(length);
        let mut rising = Vec::with_capacity(length);
        let mut level = 0.0;
        for _ in 0..length {
            running += rng.gen_range(-50.0..50.0);
            curve.push(running);
            level += rng.gen_range(0.0..10.0);
            rising.push(level);
        }
        assert!(PerformanceCalculator::max_drawdown(&curve) >= 0.0);
        assert_eq!(PerformanceCalculator::max_drawdown(&rising), 0.0);
    }
}

#[test]
fn open_position_is_closed_synthetically_at_the_end() {
    ensure_test_env();
    let series = series_of(
        vec![
            daily(date(2024, 1, 1), 100.0, 105.0, 98.0, 103.0),
            daily(date(2024, 1, 2), 103.0, 108.0, 99.0, 104.0),
        ],
        TimeInterval::OneDay,
    );
    let wide = daily_params(&[("buyStopLoss", 50.0), ("buyTakeProfit", 50.0)]);
    let result = run_daily(&series, wide, date(2024, 1, 1), date(2024, 1, 3));

    assert!(result.bucket(date(2024, 1, 1)).unwrap().trades.is_empty());
    let last = result.bucket(date(2024, 1, 2)).unwrap();
    assert_eq!(last.trades.len(), 1);
    let trade = &last.trades[0];
    assert!(trade.synthetic);
    assert_eq!(trade.exit_reason, ExitReason::EndOfRange);
    assert_eq!(trade.close_price, 104.0);
    assert_eq!(last.summary.net_points, 4.0);
    assert_eq!(result.summary.synthetic_closes, 1);
}

#[test]
fn sprout_breakout_reaches_its_target() {
    ensure_test_env();
    let day = date(2024, 2, 6);
    let bar = |hour, minute, o, h, l, c| intraday(day, hour, minute, TimeInterval::ThirtyMinute, o, h, l, c);
    let series = series_of(
        vec![
            bar(10, 0, 4010.0, 4015.0, 4005.0, 4012.0),
            bar(10, 30, 4006.0, 4012.0, 4000.0, 4010.0),
            bar(11, 0, 4010.0, 4016.0, 4004.0, 4015.0),
            bar(11, 30, 4015.0, 4055.0, 4010.0, 4050.0),
        ],
        TimeInterval::ThirtyMinute,
    );
    let result = simulate(
        &series,
        &ParameterSource::Fixed(params(SPROUT_TEMPLATE, &[])),
        &SproutStrategy::new(),
        day,
        date(2024, 2, 7),
        BucketUnit::Month,
    )
    .unwrap();

    let february = result.bucket(date(2024, 2, 1)).unwrap();
    assert_eq!(february.trades.len(), 1);
    let trade = &february.trades[0];
    assert_eq!(trade.open_price, 4012.0);
    assert_eq!(trade.close_price, 4052.0);
    assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
    assert_eq!(february.summary.net_points, 40.0);
    // 40 points at $5.60
    assert_eq!(february.summary.net_profit, 224.0);
}

#[test]
fn bloom_moves_its_stop_to_entry_and_flattens_at_the_close() {
    ensure_test_env();
    let day = date(2024, 2, 5);
    let bar = |hour, minute, o, h, l, c| intraday(day, hour, minute, TimeInterval::FiveMinute, o, h, l, c);
    let bloom = params(BLOOM_TEMPLATE, &[("breakEvenStop", 1.0)]);

    // gap up at 09:30: long 103, target 143, stop 93, break-even trigger 123
    let series = series_of(
        vec![
            bar(9, 25, 100.0, 102.0, 99.0, 101.0),
            bar(9, 30, 103.0, 106.0, 101.0, 104.0),
            bar(9, 35, 104.0, 125.0, 104.0, 120.0),
            bar(9, 40, 120.0, 121.0, 102.0, 103.0),
        ],
        TimeInterval::FiveMinute,
    );
    let result = simulate(
        &series,
        &ParameterSource::Fixed(bloom.clone()),
        &BloomStrategy::new(),
        day,
        date(2024, 2, 6),
        BucketUnit::Day,
    )
    .unwrap();
    let trade = result.trades().next().unwrap();
    assert_eq!(trade.exit_reason, ExitReason::BreakEven);
    assert_eq!(trade.close_price, 103.0);
    assert_eq!(result.summary.net_points, 0.0);

    let series = series_of(
        vec![
            bar(9, 25, 100.0, 102.0, 99.0, 101.0),
            bar(9, 30, 103.0, 106.0, 101.0, 104.0),
            bar(15, 55, 104.0, 106.0, 103.0, 105.0),
            bar(16, 0, 105.0, 107.0, 104.0, 106.0),
        ],
        TimeInterval::FiveMinute,
    );
    let result = simulate(
        &series,
        &ParameterSource::Fixed(bloom),
        &BloomStrategy::new(),
        day,
        date(2024, 2, 6),
        BucketUnit::Day,
    )
    .unwrap();
    let trade = result.trades().next().unwrap();
    assert_eq!(trade.exit_reason, ExitReason::ForcedExit);
    assert_eq!(trade.close_price, 105.0);
    assert_eq!(result.summary.net_points, 2.0);
}

#[test]
fn lenient_loading_drops_bad_bars_and_keeps_the_latest_duplicate() {
    ensure_test_env();
    let d = date(2024, 1, 2);
    let (series, dropped) = AggregatedPriceSeries::aggregate_lenient(
        vec![
            daily(d, 100.0, 110.0, 95.0, 105.0),
            daily(d, 100.0, 111.0, 95.0, 106.0),
            daily(date(2024, 1, 3), f64::NAN, 110.0, 95.0, 105.0),
            daily(date(2024, 1, 4), 100.0, 99.0, 95.0, 98.0),
        ],
        SeriesProvenance::new("fixture", "ES", TimeInterval::OneDay),
    );
    assert_eq!(dropped.len(), 2);
    assert!(dropped.iter().all(|err| err.kind() == "malformed_bar"));
    assert_eq!(series.bar_count(), 1);
    assert_eq!(series.bars_on(d)[0].close, 106.0);

    let err = AggregatedPriceSeries::aggregate_by_date(
        vec![daily(d, 100.0, 99.0, 95.0, 98.0)],
        SeriesProvenance::new("fixture", "ES", TimeInterval::OneDay),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "malformed_bar");
}

#[test]
fn equal_candidates_resolve_to_the_first_generated() {
    ensure_test_env();
    let series = Arc::new(three_day_series());
    let seed = run_daily(&series, ten_point_long(), date(2024, 1, 1), date(2024, 1, 4));

    // sell-side limits do not affect a long-only run
    let space = CandidateList::new(vec![
        [("sellStopLoss".to_string(), 5.0)].into_iter().collect(),
        [("sellStopLoss".to_string(), 8.0)].into_iter().collect(),
        [("sellStopLoss".to_string(), 12.0)].into_iter().collect(),
    ]);
    for workers in [1, 3] {
        let engine = DecisionEngine::new(Arc::clone(&series), Arc::new(FixedRangeStrategy::new()))
            .with_workers(workers);
        let decisions = engine.consider(&seed, &space).unwrap();
        assert_eq!(decisions.len(), 3);
        assert!(decisions.windows(2).all(|pair| pair[0].score == pair[1].score));
        assert_eq!(decide(&decisions).unwrap().index, 0);
    }
}

#[test]
fn grid_search_picks_the_profitable_side() {
    ensure_test_env();
    let series = Arc::new(three_day_series());
    let seed = run_daily(&series, ten_point_long(), date(2024, 1, 1), date(2024, 1, 4));
    let strategy: Arc<dyn StrategyBehavior> = Arc::from(create_strategy(FIXED_RANGE_TEMPLATE).unwrap());
    let engine = DecisionEngine::new(Arc::clone(&series), strategy).with_workers(2);

    let grid = ParameterGrid::new(vec![(
        "side".to_string(),
        ParameterRange::parse("-1:1:2").unwrap(),
    )]);
    let decisions = engine.consider(&seed, &grid).unwrap();
    assert_eq!(decisions.len(), 2);
    // short: stopped at 110, then the 105 entry rides into the third day's 85 target
    assert_eq!(decisions[0].result.summary.net_points, 10.0);
    assert_eq!(decisions[1].result.summary.net_points, -10.0);
    let selected = engine.decide(&decisions).unwrap();
    assert_eq!(selected.index, 0);
    assert_eq!(
        selected.parameters.variant,
        VariantParameters::FixedRange {
            side: TradeDirection::Short
        }
    );
}

#[test]
fn cancelled_simulation_reports_the_bucket() {
    ensure_test_env();
    let token = CancellationToken::new();
    token.cancel();
    let err = Simulator::new()
        .with_cancellation(token)
        .simulate(
            &three_day_series(),
            &ParameterSource::Fixed(ten_point_long()),
            &FixedRangeStrategy::new(),
            date(2024, 1, 1),
            date(2024, 1, 4),
            BucketUnit::Day,
        )
        .unwrap_err();
    assert_eq!(err.kind(), "cancelled");
}

#[test]
fn snapshot_feeds_a_simulation() {
    ensure_test_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("es.bin");
    let bars: Vec<PriceBar> = three_day_series().bars().copied().collect();
    let settings: HashMap<String, String> =
        [("SIMULATION_BUCKET_UNIT".to_string(), "month".to_string())].into_iter().collect();
    MarketData::from_bars(
        bars,
        SeriesProvenance::new("fixture", "ES", TimeInterval::OneDay),
        settings,
    )
    .save_to_file(&path)
    .unwrap();

    let data = MarketData::load_from_file(&path, &OptimizerStatus::new()).unwrap();
    let runtime = data.runtime_settings().unwrap();
    assert_eq!(runtime.bucket_unit, BucketUnit::Month);
    let result = simulate(
        data.series(),
        &ParameterSource::Fixed(ten_point_long()),
        &FixedRangeStrategy::new(),
        date(2024, 1, 1),
        date(2024, 2, 1),
        runtime.bucket_unit,
    )
    .unwrap();
    assert_eq!(result.buckets.len(), 1);
    assert_eq!(result.bucket(date(2024, 1, 1)).unwrap().summary.net_points, -10.0);
}
