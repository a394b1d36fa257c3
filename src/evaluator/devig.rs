//! Margin removal
//!
//! Bookmakers price every outcome slightly short so the implied
//! probabilities of a market sum to more than 1. These functions recover
//! fair probabilities (summing to 1) from a complete set of decimal odds.

use crate::config::DevigMethod;

const POWER_ITERATIONS: usize = 50;
const POWER_TOLERANCE: f64 = 1e-4;

/// Sum of implied probabilities minus one
pub fn overround(odds: &[f64]) -> Option<f64> {
    if odds.is_empty() || odds.iter().any(|&o| o <= 1.0) {
        return None;
    }
    Some(odds.iter().map(|o| 1.0 / o).sum::<f64>() - 1.0)
}

pub fn devig(odds: &[f64], method: DevigMethod) -> Option<Vec<f64>> {
    match method {
        DevigMethod::Multiplicative => multiplicative(odds),
        DevigMethod::Additive => additive(odds),
        DevigMethod::Power => power(odds),
    }
}

/// Scale implied probabilities proportionally
pub fn multiplicative(odds: &[f64]) -> Option<Vec<f64>> {
    let implied = implied(odds)?;
    let total: f64 = implied.iter().sum();
    Some(implied.iter().map(|p| p / total).collect())
}

/// Subtract an equal share of the margin from each outcome
pub fn additive(odds: &[f64]) -> Option<Vec<f64>> {
    let implied = implied(odds)?;
    let share = overround(odds)? / implied.len() as f64;
    Some(
        implied
            .iter()
            .map(|p| (p - share).clamp(0.001, 0.999))
            .collect(),
    )
}

/// Find `k` such that the implied probabilities raised to `k` sum to 1.
/// Longshots absorb more of the margin than favourites.
pub fn power(odds: &[f64]) -> Option<Vec<f64>> {
    let implied = implied(odds)?;
    let (mut lo, mut hi) = (0.5_f64, 2.0_f64);
    let mut k = 1.0;

    for _ in 0..POWER_ITERATIONS {
        k = (lo + hi) / 2.0;
        let total: f64 = implied.iter().map(|p| p.powf(k)).sum();
        if (total - 1.0).abs() < POWER_TOLERANCE {
            break;
        }
        // total falls as k grows
        if total > 1.0 {
            lo = k;
        } else {
            hi = k;
        }
    }

    let raised: Vec<f64> = implied.iter().map(|p| p.powf(k)).collect();
    let total: f64 = raised.iter().sum();
    Some(raised.iter().map(|p| p / total).collect())
}

fn implied(odds: &[f64]) -> Option<Vec<f64>> {
    if odds.len() < 2 || odds.iter().any(|&o| !o.is_finite() || o <= 1.0) {
        return None;
    }
    Some(odds.iter().map(|o| 1.0 / o).collect())
}
