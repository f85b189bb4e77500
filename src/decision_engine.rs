use crate::error::EngineError;
use crate::models::*;
use crate::optimizer_status::{CancellationToken, OptimizerStatus};
use crate::param_utils::{
    add_single_parameter_neighbor_variations, expand_parameter_grid, parameter_signature,
    snap_to_step,
};
use crate::parameters::StrategyParameters;
use crate::resolver::ParameterSource;
use crate::series::AggregatedPriceSeries;
use crate::simulation::Simulator;
use crate::strategy::StrategyBehavior;
use crate::trade_lifecycle::TradeIdSource;
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub const DEFAULT_NEIGHBOR_STEP_MULTIPLIERS: [f64; 4] = [-2.0, -1.0, 1.0, 2.0];

/// Produces candidate parameter maps from the seed run's parameter map.
/// Output order is the candidate generation order used for tie-breaks.
pub trait CandidateSpace: Send + Sync {
    fn name(&self) -> &str;

    fn expand(&self, seed: &HashMap<String, f64>) -> Vec<HashMap<String, f64>>;
}

/// Explicit candidates, each a set of overrides layered over the seed.
pub struct CandidateList {
    overrides: Vec<HashMap<String, f64>>,
}

impl CandidateList {
    pub fn new(overrides: Vec<HashMap<String, f64>>) -> Self {
        Self { overrides }
    }

    pub fn from_parameters(candidates: &[StrategyParameters]) -> Self {
        Self::new(candidates.iter().map(|params| params.to_parameters()).collect())
    }
}

impl CandidateSpace for CandidateList {
    fn name(&self) -> &str {
        "list"
    }

    fn expand(&self, seed: &HashMap<String, f64>) -> Vec<HashMap<String, f64>> {
        self.overrides
            .iter()
            .map(|overrides| {
                let mut params = seed.clone();
                params.extend(overrides.iter().map(|(key, value)| (key.clone(), *value)));
                params
            })
            .collect()
    }
}

/// Cartesian product of named ranges; the first name varies slowest.
pub struct ParameterGrid {
    names: Vec<String>,
    ranges: HashMap<String, ParameterRange>,
}

impl ParameterGrid {
    pub fn new(ranges: Vec<(String, ParameterRange)>) -> Self {
        Self {
            names: ranges.iter().map(|(name, _)| name.clone()).collect(),
            ranges: ranges.into_iter().collect(),
        }
    }
}

impl CandidateSpace for ParameterGrid {
    fn name(&self) -> &str {
        "grid"
    }

    fn expand(&self, seed: &HashMap<String, f64>) -> Vec<HashMap<String, f64>> {
        expand_parameter_grid(seed, &self.names, &self.ranges)
    }
}

/// The seed followed by every single-parameter step away from it.
pub struct NeighborSearch {
    names: Vec<String>,
    ranges: HashMap<String, ParameterRange>,
    step_multipliers: Vec<f64>,
}

impl NeighborSearch {
    pub fn new(ranges: Vec<(String, ParameterRange)>) -> Self {
        Self {
            names: ranges.iter().map(|(name, _)| name.clone()).collect(),
            ranges: ranges.into_iter().collect(),
            step_multipliers: DEFAULT_NEIGHBOR_STEP_MULTIPLIERS.to_vec(),
        }
    }

    pub fn with_step_multipliers(mut self, step_multipliers: Vec<f64>) -> Self {
        self.step_multipliers = step_multipliers;
        self
    }
}

impl CandidateSpace for NeighborSearch {
    fn name(&self) -> &str {
        "neighbors"
    }

    fn expand(&self, seed: &HashMap<String, f64>) -> Vec<HashMap<String, f64>> {
        let mut seen = HashSet::new();
        seen.insert(parameter_signature(seed));
        let mut variations = vec![seed.clone()];
        add_single_parameter_neighbor_variations(
            &self.names,
            &self.ranges,
            &self.step_multipliers,
            seed,
            &mut seen,
            &mut variations,
        );
        variations
    }
}

/// Uniform samples over the named ranges, snapped to each range's step.
/// The same seed always yields the same candidates.
pub struct RandomSearch {
    names: Vec<String>,
    ranges: HashMap<String, ParameterRange>,
    samples: usize,
    seed: u64,
}

impl RandomSearch {
    pub fn new(ranges: Vec<(String, ParameterRange)>, samples: usize, seed: u64) -> Self {
        Self {
            names: ranges.iter().map(|(name, _)| name.clone()).collect(),
            ranges: ranges.into_iter().collect(),
            samples,
            seed,
        }
    }
}

impl CandidateSpace for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn expand(&self, seed: &HashMap<String, f64>) -> Vec<HashMap<String, f64>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(self.samples);
        for _ in 0..self.samples {
            let mut params = seed.clone();
            for name in &self.names {
                let Some(range) = self.ranges.get(name) else {
                    continue;
                };
                let value = if range.max > range.min {
                    rng.gen_range(range.min..=range.max)
                } else {
                    range.min
                };
                params.insert(name.clone(), snap_to_step(value, range));
            }
            if seen.insert(parameter_signature(&params)) {
                candidates.push(params);
            }
        }
        candidates
    }
}

/// Ranks a simulated candidate; higher is better.
pub trait ScorePolicy: Send + Sync {
    fn score(&self, result: &SimulationResult) -> f64;
}

/// `profit * netProfit + win_rate * winPercentage - drawdown * maxDrawdown`
/// over the run-level summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedScore {
    pub profit: f64,
    pub win_rate: f64,
    pub drawdown: f64,
}

impl Default for WeightedScore {
    fn default() -> Self {
        Self {
            profit: 1.0,
            win_rate: 0.0,
            drawdown: 1.0,
        }
    }
}

impl ScorePolicy for WeightedScore {
    fn score(&self, result: &SimulationResult) -> f64 {
        let summary = &result.summary;
        self.profit * summary.net_profit + self.win_rate * summary.win_percentage
            - self.drawdown * summary.max_drawdown
    }
}

fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score
    } else {
        f64::NEG_INFINITY
    }
}

struct CandidateTask {
    index: usize,
    cache_key: String,
    parameters: StrategyParameters,
}

struct CandidateTaskResult {
    index: usize,
    parameters: StrategyParameters,
    result: Result<SimulationResult, EngineError>,
}

/// Evaluates candidate parameter sets against one shared series on a pool of
/// worker threads and picks the best of them.
pub struct DecisionEngine {
    series: Arc<AggregatedPriceSeries>,
    strategy: Arc<dyn StrategyBehavior>,
    policy: Arc<dyn ScorePolicy>,
    workers: usize,
    show_progress: bool,
    status: OptimizerStatus,
    cancellation: CancellationToken,
    trade_ids: TradeIdSource,
    cache: Arc<DashMap<String, SimulationResult>>,
}

impl DecisionEngine {
    pub fn new(series: Arc<AggregatedPriceSeries>, strategy: Arc<dyn StrategyBehavior>) -> Self {
        Self {
            series,
            strategy,
            policy: Arc::new(WeightedScore::default()),
            workers: std::cmp::max(1, num_cpus::get()),
            show_progress: false,
            status: OptimizerStatus::new(),
            cancellation: CancellationToken::new(),
            trade_ids: TradeIdSource::default(),
            cache: Arc::new(DashMap::new()),
        }
    }

    pub fn with_policy<P: ScorePolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = std::cmp::max(1, workers);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Id scheme for every candidate run. Sequential ids restart per run, so
    /// trades from different candidates may share an id.
    pub fn with_trade_ids(mut self, trade_ids: TradeIdSource) -> Self {
        self.trade_ids = trade_ids;
        self
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Simulates every candidate of `space` over the seed run's date range and
    /// bucket unit. Decisions come back in candidate generation order; failed
    /// candidates are logged and left out.
    pub fn consider(
        &self,
        seed: &SimulationResult,
        space: &dyn CandidateSpace,
    ) -> Result<Vec<Decision>, EngineError> {
        let Some(seed_parameters) = seed.seed_parameters.as_ref() else {
            return Err(EngineError::NoViableCandidate { candidates: 0 });
        };
        let template_id = self.strategy.get_template_id().to_string();

        let variations = space.expand(&seed_parameters.to_parameters());
        if variations.is_empty() {
            return Err(EngineError::NoViableCandidate { candidates: 0 });
        }

        let mut tasks = Vec::with_capacity(variations.len());
        for (index, variation) in variations.iter().enumerate() {
            match StrategyParameters::from_parameters(&template_id, variation) {
                Ok(parameters) => {
                    let rounding = seed_parameters.base.rounding;
                    let parameters = parameters
                        .with_rounding(rounding)
                        .with_description(&seed_parameters.base.description);
                    // rounding is not part of the parameter map but moves exit levels
                    tasks.push(CandidateTask {
                        index,
                        cache_key: format!(
                            "{}:{}:{}:{}:{}:{:?}:{:?}:{}",
                            template_id,
                            seed.start,
                            seed.end,
                            seed.unit.label(),
                            rounding.scale,
                            rounding.mode,
                            self.trade_ids,
                            parameter_signature(&parameters.to_parameters())
                        ),
                        parameters,
                    });
                }
                Err(e) => warn!("Skipping {} candidate {}: {}", space.name(), index, e),
            }
        }
        if tasks.is_empty() {
            return Err(EngineError::NoViableCandidate {
                candidates: variations.len(),
            });
        }

        let task_count = tasks.len();
        info!(
            "Evaluating {} {} candidate(s) for {} from {} to {}",
            task_count,
            space.name(),
            template_id,
            seed.start,
            seed.end
        );
        let num_workers = std::cmp::min(task_count, self.workers);
        info!("Using {} worker threads", num_workers);
        self.status.set_phase(format!("Evaluating {} candidates", space.name()));
        self.status.set_progress(task_count, 0, 0, None);

        let (tx, rx): (Sender<CandidateTask>, Receiver<CandidateTask>) = bounded(task_count);
        let (result_tx, result_rx): (Sender<CandidateTaskResult>, Receiver<CandidateTaskResult>) =
            bounded(task_count);

        let mut handles = Vec::new();
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let series = Arc::clone(&self.series);
            let strategy = Arc::clone(&self.strategy);
            let cache = Arc::clone(&self.cache);
            let cancellation = self.cancellation.clone();
            let trade_ids = self.trade_ids;
            let (start, end, unit) = (seed.start, seed.end, seed.unit);

            let handle = thread::spawn(move || {
                let simulator = Simulator::new()
                    .with_cancellation(cancellation.clone())
                    .with_trade_ids(trade_ids);
                while let Ok(task) = rx.recv() {
                    let start_time = Instant::now();
                    let result = if cancellation.is_cancelled() {
                        Err(EngineError::Cancelled { bucket: start })
                    } else if let Some(cached) = cache.get(&task.cache_key) {
                        Ok(cached.clone())
                    } else {
                        let source = ParameterSource::Fixed(task.parameters.clone());
                        let result =
                            simulator.simulate(&series, &source, strategy.as_ref(), start, end, unit);
                        if let Ok(simulated) = &result {
                            cache.insert(task.cache_key.clone(), simulated.clone());
                        }
                        result
                    };

                    match &result {
                        Ok(simulated) => info!(
                            "Worker finished candidate {} in {:.2}s. Trades: {}, net points: {:.2}, net profit: {:.2}, max DD: {:.2}",
                            task.index,
                            start_time.elapsed().as_secs_f64(),
                            simulated.summary.trade_count,
                            simulated.summary.net_points,
                            simulated.summary.net_profit,
                            simulated.summary.max_drawdown
                        ),
                        Err(EngineError::Cancelled { .. }) => {}
                        Err(e) => warn!("Worker finished candidate {} with error: {}", task.index, e),
                    }

                    let message = CandidateTaskResult {
                        index: task.index,
                        parameters: task.parameters,
                        result,
                    };
                    if result_tx.send(message).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        for task in tasks {
            if tx.send(task).is_err() {
                break;
            }
        }
        drop(tx);

        let pb = if self.show_progress {
            ProgressBar::new(task_count as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut decisions = Vec::with_capacity(task_count);
        let mut completed = 0;
        let mut failed = 0;
        let mut best_score: Option<f64> = None;
        let mut cancelled: Option<EngineError> = None;
        while completed < task_count {
            match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(message) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    match message.result {
                        Ok(result) => {
                            let score = sanitize_score(self.policy.score(&result));
                            if best_score.map_or(true, |best| score > best) {
                                best_score = Some(score);
                            }
                            decisions.push(Decision {
                                index: message.index,
                                parameters: message.parameters,
                                result,
                                score,
                            });
                        }
                        Err(e @ EngineError::Cancelled { .. }) => {
                            cancelled.get_or_insert(e);
                        }
                        Err(_) => failed += 1,
                    }
                    self.status
                        .set_progress(task_count, completed, failed, best_score);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if failed > 0 {
            warn!("Candidate evaluation completed with {} failed candidate(s)", failed);
            pb.finish_with_message("Evaluation completed with errors");
        } else {
            pb.finish_with_message("Evaluation completed");
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("A decision worker panicked");
            }
        }

        if let Some(e) = cancelled {
            self.status.set_phase("Cancelled");
            return Err(e);
        }

        self.status.set_phase("Completed");
        decisions.sort_by_key(|decision| decision.index);
        Ok(decisions)
    }

    pub fn decide(&self, decisions: &[Decision]) -> Result<Decision, EngineError> {
        let selected = decide(decisions)?;
        info!(
            "Selected candidate {} with score {:.2} ({} trades, max DD {:.2})",
            selected.index,
            selected.score,
            selected.result.total_trades(),
            selected.max_drawdown()
        );
        Ok(selected)
    }
}

/// `a` ranks ahead of `b`: higher score, then lower drawdown, then earlier index.
fn rank(a: &Decision, b: &Decision) -> Ordering {
    sanitize_score(b.score)
        .partial_cmp(&sanitize_score(a.score))
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.max_drawdown()
                .partial_cmp(&b.max_drawdown())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.index.cmp(&b.index))
}

/// Picks the best decision that produced at least one trade.
pub fn decide(decisions: &[Decision]) -> Result<Decision, EngineError> {
    decisions
        .iter()
        .filter(|decision| decision.has_trades())
        .min_by(|a, b| rank(a, b))
        .cloned()
        .ok_or(EngineError::NoViableCandidate {
            candidates: decisions.len(),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSwitch {
    pub candidate_index: usize,
    pub trade_number: usize,
    pub cumulative_points: f64,
}

fn cumulative_points(decision: &Decision) -> Vec<f64> {
    let mut entries: Vec<&CumulativeReportEntry> = decision
        .result
        .buckets
        .values()
        .flat_map(|bucket| bucket.entries.iter())
        .collect();
    entries.sort_by(|a, b| {
        a.close_time
            .cmp(&b.close_time)
            .then_with(|| a.trade_id.cmp(&b.trade_id))
    });

    let mut running = 0.0;
    entries
        .into_iter()
        .map(|entry| {
            running += entry.points;
            running
        })
        .collect()
}

fn points_at(curve: &[f64], trade_number: usize) -> f64 {
    match trade_number.min(curve.len()) {
        0 => 0.0,
        n => curve[n - 1],
    }
}

/// Walks trade counts in steps of `window` and records every point at which
/// a different decision takes the lead in cumulative points. A decision with
/// fewer trades keeps its last total.
pub fn switch_timeline(decisions: &[Decision], window: usize) -> Vec<DecisionSwitch> {
    if window == 0 || decisions.is_empty() {
        return Vec::new();
    }

    let curves: Vec<Vec<f64>> = decisions.iter().map(cumulative_points).collect();
    let longest = curves.iter().map(Vec::len).max().unwrap_or(0);

    let mut switches = Vec::new();
    let mut current: Option<usize> = None;
    let mut trade_number = window;
    while trade_number <= longest {
        let mut leader = 0;
        for (position, curve) in curves.iter().enumerate() {
            if points_at(curve, trade_number) > points_at(&curves[leader], trade_number) {
                leader = position;
            }
        }

        let leads = match current {
            None => true,
            Some(position) => {
                points_at(&curves[leader], trade_number) > points_at(&curves[position], trade_number)
            }
        };
        if leads && current != Some(leader) {
            current = Some(leader);
            switches.push(DecisionSwitch {
                candidate_index: decisions[leader].index,
                trade_number,
                cumulative_points: points_at(&curves[leader], trade_number),
            });
        }
        trade_number += window;
    }
    switches
}

/// Points earned by holding whichever decision the timeline points at. The
/// first decision is held until the first switch; each switched-to decision
/// is held from its switch trade number until the next switch, the last one
/// until the longest curve ends.
pub fn realized_points(decisions: &[Decision], switches: &[DecisionSwitch]) -> f64 {
    if decisions.is_empty() {
        return 0.0;
    }

    let curves: Vec<Vec<f64>> = decisions.iter().map(cumulative_points).collect();
    let longest = curves.iter().map(Vec::len).max().unwrap_or(0);

    let mut held = 0;
    let mut from = 0;
    let mut total = 0.0;
    for switch in switches {
        let Some(next) = decisions
            .iter()
            .position(|decision| decision.index == switch.candidate_index)
        else {
            continue;
        };
        let to = switch.trade_number.max(from);
        total += points_at(&curves[held], to) - points_at(&curves[held], from);
        held = next;
        from = to;
    }
    total + points_at(&curves[held], longest) - points_at(&curves[held], from)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEvaluation {
    pub window: usize,
    pub switches: usize,
    pub realized_points: f64,
}

/// Replays the switch timeline for every window and scores it by the points
/// realized while following it. Zero windows are skipped.
pub fn evaluate_switch_windows<I>(decisions: &[Decision], windows: I) -> Vec<WindowEvaluation>
where
    I: IntoIterator<Item = usize>,
{
    windows
        .into_iter()
        .filter(|window| *window > 0)
        .map(|window| {
            let switches = switch_timeline(decisions, window);
            WindowEvaluation {
                window,
                switches: switches.len(),
                realized_points: realized_points(decisions, &switches),
            }
        })
        .collect()
}

/// Best window by realized points; ties go to the smaller window.
pub fn best_switch_window(evaluations: &[WindowEvaluation]) -> Option<&WindowEvaluation> {
    evaluations.iter().fold(None, |best, evaluation| match best {
        Some(current) if current.realized_points >= evaluation.realized_points => Some(current),
        _ => Some(evaluation),
    })
}
