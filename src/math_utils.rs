use anyhow::{anyhow, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingMode {
    HalfEven,
    HalfUp,
}

impl RoundingMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "half_even" | "halfeven" | "bankers" => Ok(Self::HalfEven),
            "half_up" | "halfup" => Ok(Self::HalfUp),
            other => Err(anyhow!("Rounding mode must be half_even or half_up (value: {})", other)),
        }
    }

    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
        }
    }
}

/// Decimal rounding applied to every monetary and point value the simulation
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingPolicy {
    pub scale: u32,
    pub mode: RoundingMode,
}

impl Default for RoundingPolicy {
    fn default() -> Self {
        Self {
            scale: 2,
            mode: RoundingMode::HalfEven,
        }
    }
}

impl RoundingPolicy {
    pub fn new(scale: u32, mode: RoundingMode) -> Self {
        Self { scale, mode }
    }

    /// Rounds through a decimal so binary float noise does not leak into
    /// midpoint decisions. Non-finite input is returned unchanged.
    pub fn apply(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return value;
        }
        Decimal::from_f64(value)
            .map(|decimal| decimal.round_dp_with_strategy(self.scale, self.mode.strategy()))
            .and_then(|rounded| rounded.to_f64())
            .unwrap_or(value)
    }
}

/// Division that yields zero instead of inf/NaN for an empty denominator.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

/// `100 * part / total` truncated to a whole percentage.
pub fn whole_percentage(part: f64, total: f64) -> f64 {
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    (100.0 * part / total).floor()
}

pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * part as f64 / total as f64
}

/// Moves `price` by `increment` points in the requested direction, rounded.
pub fn calculate_limit(price: f64, increment: f64, add: bool, rounding: &RoundingPolicy) -> f64 {
    if add {
        rounding.apply(price + increment)
    } else {
        rounding.apply(price - increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_even_and_half_up_disagree_on_midpoints() {
        let even = RoundingPolicy::new(2, RoundingMode::HalfEven);
        let up = RoundingPolicy::new(2, RoundingMode::HalfUp);
        assert!((even.apply(0.125) - 0.12).abs() < 1e-9);
        assert!((up.apply(0.125) - 0.13).abs() < 1e-9);
        assert!((even.apply(6.6666667) - 6.67).abs() < 1e-9);
    }

    #[test]
    fn rounding_leaves_non_finite_values_alone() {
        let policy = RoundingPolicy::default();
        assert!(policy.apply(f64::NAN).is_nan());
        assert_eq!(policy.apply(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn percentages_handle_empty_totals() {
        assert_eq!(whole_percentage(0.0, 0.0), 0.0);
        assert_eq!(whole_percentage(2.0, 3.0), 66.0);
        assert!((percentage(1, 3) - 33.333333333).abs() < 1e-6);
        assert_eq!(safe_divide(5.0, 0.0), 0.0);
    }

    #[test]
    fn limits_move_in_both_directions() {
        let policy = RoundingPolicy::default();
        assert!((calculate_limit(4012.25, 10.5, true, &policy) - 4022.75).abs() < 1e-9);
        assert!((calculate_limit(4012.25, 10.5, false, &policy) - 4001.75).abs() < 1e-9);
    }
}
