use crate::models::ParameterRange;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Finite value for `key`, if any.
pub fn finite_param(params: &HashMap<String, f64>, key: &str) -> Option<f64> {
    match params.get(key) {
        Some(value) if value.is_finite() => Some(*value),
        _ => None,
    }
}

/// Non-negative count, rounded to the nearest integer.
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    match finite_param(params, key) {
        Some(value) if value >= 0.0 => value.round() as usize,
        _ => default,
    }
}

pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    *params.get(key).unwrap_or(&default)
}

pub fn rounded_param(params: &HashMap<String, f64>, key: &str) -> Option<i64> {
    finite_param(params, key).map(|value| value.round() as i64)
}

/// Reads a 0/1 flag; anything at or above one half counts as set.
pub fn get_flag_param(params: &HashMap<String, f64>, key: &str, default: bool) -> bool {
    finite_param(params, key).map_or(default, |value| value >= 0.5)
}

pub fn flag_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Snaps `value` onto the `min + k * step` lattice of `range`.
pub fn snap_to_step(value: f64, range: &ParameterRange) -> f64 {
    if range.step <= 0.0 {
        return value.clamp(range.min, range.max);
    }
    let steps = ((value - range.min) / range.step).round();
    (range.min + steps * range.step).clamp(range.min, range.max)
}

/// Stable textual key for a parameter map, independent of hash order.
pub fn parameter_signature(params: &HashMap<String, f64>) -> String {
    let sorted: BTreeMap<&String, &f64> = params.iter().collect();
    format!("{:?}", sorted)
}

/// Appends `params` unless an identical map was already collected.
fn push_unique(
    params: HashMap<String, f64>,
    seen: &mut HashSet<String>,
    out: &mut Vec<HashMap<String, f64>>,
) {
    if seen.insert(parameter_signature(&params)) {
        out.push(params);
    }
}

/// Moves each named parameter of `current` by `multiplier * step`, one
/// parameter at a time. Steps that leave the range or land on the current
/// value are skipped.
pub fn add_single_parameter_neighbor_variations(
    names: &[String],
    ranges: &HashMap<String, ParameterRange>,
    step_multipliers: &[f64],
    current: &HashMap<String, f64>,
    seen: &mut HashSet<String>,
    out: &mut Vec<HashMap<String, f64>>,
) {
    for name in names {
        let (Some(range), Some(&value)) = (ranges.get(name), current.get(name)) else {
            continue;
        };

        let stepped = step_multipliers
            .iter()
            .map(|multiplier| value + multiplier * range.step)
            .filter(|candidate| {
                *candidate >= range.min - 1e-9 && *candidate <= range.max + 1e-9
            })
            .map(|candidate| candidate.clamp(range.min, range.max))
            .filter(|candidate| (candidate - value).abs() >= 1e-9);
        for candidate in stepped {
            let mut params = current.clone();
            params.insert(name.clone(), candidate);
            push_unique(params, seen, out);
        }
    }
}

/// Cartesian product of the named ranges layered over `base`. The first name
/// varies slowest, so output order only depends on the order of `names`.
pub fn expand_parameter_grid(
    base: &HashMap<String, f64>,
    names: &[String],
    parameter_ranges: &HashMap<String, ParameterRange>,
) -> Vec<HashMap<String, f64>> {
    let mut combinations = vec![base.clone()];
    for name in names {
        let Some(range) = parameter_ranges.get(name) else {
            continue;
        };
        let values = range.values();
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combination in &combinations {
            for value in &values {
                let mut params = combination.clone();
                params.insert(name.clone(), *value);
                next.push(params);
            }
        }
        combinations = next;
    }

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(combinations.len());
    for params in combinations {
        push_unique(params, &mut seen, &mut unique);
    }
    unique
}
