use crate::math_utils::{percentage, safe_divide, whole_percentage, RoundingMode, RoundingPolicy};
use crate::models::*;
use crate::parameters::BasicParameters;
use chrono::NaiveDate;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Trades lasting a full session (390 minutes) or longer are left out of the
/// average duration.
const MAX_COUNTED_DURATION_MINUTES: i64 = 390;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Folds trades, ordered by close time, into running report entries.
    pub fn report_entries(
        trades: &[ClosedTrade],
        price_per_point: f64,
        rounding: &RoundingPolicy,
    ) -> Vec<CumulativeReportEntry> {
        let mut ordered: Vec<&ClosedTrade> = trades.iter().collect();
        ordered.sort_by(|a, b| a.close_time.cmp(&b.close_time).then_with(|| a.id.cmp(&b.id)));

        let mut entries: Vec<CumulativeReportEntry> = Vec::with_capacity(ordered.len());
        for trade in ordered {
            let next = CumulativeReportEntry::next(entries.last(), trade, price_per_point, rounding);
            entries.push(next);
        }
        entries
    }

    /// Statistics over a run of per-trade entries. Only the per-trade deltas
    /// are read, so entries from several buckets may be concatenated.
    pub fn summarize(entries: &[CumulativeReportEntry], base: &BasicParameters) -> BucketSummary {
        if entries.is_empty() {
            return BucketSummary::default();
        }
        let rounding = &base.rounding;

        let trade_count = entries.len();
        let hits = entries.iter().filter(|entry| entry.points > 0.0).count();
        let misses = entries.iter().filter(|entry| entry.points < 0.0).count();
        let profitable = entries.iter().filter(|entry| entry.profit > 0.0).count();

        let points_gained = rounding.apply(
            entries
                .iter()
                .filter(|entry| entry.points > 0.0)
                .map(|entry| entry.points)
                .sum(),
        );
        let points_lost = rounding.apply(
            entries
                .iter()
                .filter(|entry| entry.points < 0.0)
                .map(|entry| entry.points)
                .sum::<f64>()
                .abs(),
        );
        let net_points = rounding.apply(entries.iter().map(|entry| entry.points).sum());
        let net_profit = rounding.apply(entries.iter().map(|entry| entry.profit).sum());

        let mut curve = Vec::with_capacity(trade_count + 1);
        curve.push(0.0);
        let mut running = 0.0;
        for entry in entries {
            running += entry.profit;
            curve.push(running);
        }

        BucketSummary {
            trade_count,
            hits,
            misses,
            net_points,
            net_profit,
            scaled_net_profit: if base.scale_profits {
                Some(Self::scaled_net_profit(entries, base))
            } else {
                None
            },
            points_gained,
            points_lost,
            profitability: rounding.apply(safe_divide(points_gained, points_lost)),
            retention: whole_percentage(points_gained, points_gained + points_lost),
            win_percentage: rounding.apply(percentage(profitable, trade_count)),
            daily_win_percentage: rounding.apply(Self::daily_win_percentage(entries)),
            max_drawdown: rounding.apply(Self::max_drawdown(&curve)),
            relative_drawdown: rounding.apply(Self::relative_drawdown(entries)),
            average_trade_duration_minutes: rounding
                .apply(Self::average_trade_duration_minutes(entries)),
            synthetic_closes: entries.iter().filter(|entry| entry.synthetic).count(),
        }
    }

    /// Largest peak-to-trough decline of `curve`, scanning once from the
    /// first element. Never negative.
    pub fn max_drawdown(curve: &[f64]) -> f64 {
        let Some(first) = curve.first() else {
            return 0.0;
        };

        let mut peak = *first;
        let mut max_drawdown = 0.0_f64;
        for value in curve {
            if *value > peak {
                peak = *value;
            } else {
                max_drawdown = max_drawdown.max(peak - value);
            }
        }
        max_drawdown
    }

    /// Deepest run of consecutive non-winning trades, in points.
    pub fn relative_drawdown(entries: &[CumulativeReportEntry]) -> f64 {
        let mut ordered: Vec<&CumulativeReportEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| {
            a.open_time
                .cmp(&b.open_time)
                .then_with(|| a.close_time.cmp(&b.close_time))
        });

        let mut run = 0.0;
        let mut deepest = 0.0_f64;
        for entry in ordered {
            if entry.points > 0.0 {
                run = 0.0;
            } else {
                run += entry.points;
            }
            deepest = deepest.min(run);
        }
        deepest.abs()
    }

    /// Share of trading days that ended net positive. A trade counts toward
    /// the day it opened on, so overnight positions stay with their session.
    pub fn daily_win_percentage(entries: &[CumulativeReportEntry]) -> f64 {
        let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for entry in entries {
            *by_day.entry(entry.open_time.date()).or_insert(0.0) += entry.profit;
        }
        let winning_days = by_day.values().filter(|profit| **profit > 0.0).count();
        percentage(winning_days, by_day.len())
    }

    pub fn average_trade_duration_minutes(entries: &[CumulativeReportEntry]) -> f64 {
        let durations: Vec<f64> = entries
            .iter()
            .map(|entry| entry.duration_minutes())
            .filter(|minutes| *minutes < MAX_COUNTED_DURATION_MINUTES)
            .map(|minutes| minutes as f64)
            .collect();
        if durations.is_empty() {
            return 0.0;
        }
        durations.mean()
    }

    /// Net profit when the price per point tracks 1% of the running balance.
    /// The first trade uses the configured price per point; each later trade
    /// re-scales it from the balance after the previous trade.
    pub fn scaled_net_profit(entries: &[CumulativeReportEntry], base: &BasicParameters) -> f64 {
        let rounding = &base.rounding;
        let one_percent = base.initial_balance * 0.01;
        let multiplier = safe_divide(base.price_per_point, one_percent);

        let mut balance = base.initial_balance;
        for (index, entry) in entries.iter().enumerate() {
            let price_per_point = if index == 0 {
                base.price_per_point
            } else {
                // price per point is quoted in cents
                RoundingPolicy::new(2, RoundingMode::HalfEven).apply(balance * 0.01 * multiplier)
            };
            balance = rounding.apply(balance + rounding.apply(entry.points * price_per_point));
        }
        rounding.apply(balance - base.initial_balance)
    }
}
