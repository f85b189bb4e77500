use crate::commands::{
    build_parameter_source, load_market_data, log_simulation_summary, write_json_output, RunRequest,
};
use crate::decision_engine::{
    best_switch_window, evaluate_switch_windows, realized_points, switch_timeline,
    CandidateSpace, DecisionEngine, DecisionSwitch, NeighborSearch, ParameterGrid, RandomSearch,
    WindowEvaluation,
};
use crate::models::{BucketSummary, BucketUnit, Decision, ParameterRange};
use crate::simulation::Simulator;
use crate::strategy::{create_strategy, StrategyBehavior};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::ValueEnum;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    /// Every combination of the given ranges
    Grid,
    /// One-parameter steps around the seed parameters
    Neighbors,
    /// Seeded uniform samples over the given ranges
    Random,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub ranges: Vec<(String, ParameterRange)>,
    pub samples: usize,
    pub seed: u64,
    pub switch_window: Option<usize>,
    pub window_sweep: Option<RangeInclusive<usize>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateSummary {
    index: usize,
    score: f64,
    parameters: BTreeMap<String, f64>,
    summary: BucketSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OptimizationReport {
    template_id: String,
    start: NaiveDate,
    end: NaiveDate,
    unit: BucketUnit,
    seed_summary: BucketSummary,
    candidates: Vec<CandidateSummary>,
    selected: Decision,
    switches: Vec<DecisionSwitch>,
    window_evaluations: Vec<WindowEvaluation>,
}

pub fn run(request: &RunRequest, search: &SearchOptions) -> Result<()> {
    info!(
        "Received optimize command for template_id={} ({} - {}, {:?} search)",
        request.template_id, request.start, request.end, search.mode
    );
    if search.ranges.is_empty() {
        return Err(anyhow!("At least one --range key=min:max:step is required"));
    }

    let data = load_market_data(&request.data_file)?;
    let settings = data.runtime_settings()?;
    let unit = request.unit.unwrap_or(settings.bucket_unit);
    let strategy: Arc<dyn StrategyBehavior> = Arc::from(create_strategy(&request.template_id)?);

    let source = build_parameter_source(request, settings.rounding)?;
    let seed = Simulator::new().with_trade_ids(settings.trade_ids).simulate(
        data.series(),
        &source,
        strategy.as_ref(),
        request.start,
        request.end,
        unit,
    )?;
    info!("Seed run:");
    log_simulation_summary(&seed);

    let space: Box<dyn CandidateSpace> = match search.mode {
        SearchMode::Grid => Box::new(ParameterGrid::new(search.ranges.clone())),
        SearchMode::Neighbors => Box::new(
            NeighborSearch::new(search.ranges.clone())
                .with_step_multipliers(settings.neighbor_step_multipliers.clone()),
        ),
        SearchMode::Random => Box::new(RandomSearch::new(
            search.ranges.clone(),
            search.samples,
            search.seed,
        )),
    };

    let engine = DecisionEngine::new(data.series_arc(), strategy)
        .with_policy(settings.score_weights)
        .with_workers(settings.decision_workers)
        .with_trade_ids(settings.trade_ids)
        .with_progress(true);
    let decisions = engine.consider(&seed, space.as_ref())?;
    let selected = engine.decide(&decisions)?;
    log_simulation_summary(&selected.result);

    let switches = match search.switch_window {
        Some(window) => {
            let switches = switch_timeline(&decisions, window);
            for switch in &switches {
                info!(
                    "Trade {}: candidate {} leads with {:.2} points",
                    switch.trade_number, switch.candidate_index, switch.cumulative_points
                );
            }
            info!(
                "Following the leader every {} trades realizes {:.2} points",
                window,
                realized_points(&decisions, &switches)
            );
            switches
        }
        None => Vec::new(),
    };

    let window_evaluations = match search.window_sweep.clone() {
        Some(windows) => {
            let evaluations = evaluate_switch_windows(&decisions, windows);
            if let Some(best) = best_switch_window(&evaluations) {
                info!(
                    "Best switch window over {} tried: {} trades ({} switches, {:.2} points)",
                    evaluations.len(),
                    best.window,
                    best.switches,
                    best.realized_points
                );
            }
            evaluations
        }
        None => Vec::new(),
    };

    if let Some(output) = request.output.as_ref() {
        let report = OptimizationReport {
            template_id: request.template_id.clone(),
            start: request.start,
            end: request.end,
            unit,
            seed_summary: seed.summary.clone(),
            candidates: decisions
                .iter()
                .map(|decision| CandidateSummary {
                    index: decision.index,
                    score: decision.score,
                    parameters: decision.parameters.to_parameters().into_iter().collect(),
                    summary: decision.result.summary.clone(),
                })
                .collect(),
            selected,
            switches,
            window_evaluations,
        };
        write_json_output(&report, output)?;
    }
    Ok(())
}
