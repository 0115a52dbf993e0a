//! Simplified two-proportion z-test used to call experiment winners.
//!
//! The z-score to confidence mapping uses fixed breakpoints with a linear
//! ramp below 1.65. It is not a p-value curve; promotion decisions depend on
//! these exact values.

use crate::experiment::VariantMetrics;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Variant index with the higher conversion rate.
    pub leader: usize,
    pub runner_up: usize,
    pub pooled_rate: f64,
    pub standard_error: f64,
    pub z_score: f64,
    pub confidence: f64,
}

pub fn conversion_rate(conversions: u64, impressions: u64) -> f64 {
    if impressions == 0 {
        0.0
    } else {
        conversions as f64 / impressions as f64
    }
}

/// Pooled two-proportion z-score of `(x1, n1)` against `(x2, n2)`.
/// Returns `(z, pooled_rate, standard_error)`; z is 0 when the standard
/// error vanishes.
pub fn two_proportion_z(x1: u64, n1: u64, x2: u64, n2: u64) -> (f64, f64, f64) {
    if n1 == 0 || n2 == 0 {
        return (0.0, 0.0, 0.0);
    }
    let p1 = conversion_rate(x1, n1);
    let p2 = conversion_rate(x2, n2);
    let pooled = (x1 + x2) as f64 / (n1 + n2) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return (0.0, pooled, 0.0);
    }
    ((p1 - p2).abs() / se, pooled, se)
}

pub fn confidence_from_z(z: f64) -> f64 {
    if z > 2.58 {
        0.99
    } else if z > 1.96 {
        0.95
    } else if z > 1.65 {
        0.90
    } else {
        (0.50 + 0.40 * (z.max(0.0) / 1.65)).min(0.90)
    }
}

/// Compare the two best-converting variants that each have at least
/// `min_impressions` impressions. Ties in conversion rate go to the variant
/// declared first. `None` when fewer than two variants are eligible.
pub fn compare(metrics: &[VariantMetrics], min_impressions: u64) -> Option<SignificanceResult> {
    let mut eligible: Vec<usize> = (0..metrics.len())
        .filter(|&i| metrics[i].impressions >= min_impressions)
        .collect();
    if eligible.len() < 2 {
        return None;
    }
    // Stable sort keeps declaration order among equal rates.
    eligible.sort_by(|&a, &b| {
        metrics[b]
            .conversion_rate()
            .partial_cmp(&metrics[a].conversion_rate())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let (leader, runner_up) = (eligible[0], eligible[1]);
    let (a, b) = (&metrics[leader], &metrics[runner_up]);
    let (z, pooled, se) = two_proportion_z(a.conversions, a.impressions, b.conversions, b.impressions);

    Some(SignificanceResult {
        leader,
        runner_up,
        pooled_rate: pooled,
        standard_error: se,
        z_score: z,
        confidence: confidence_from_z(z),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(impressions: u64, conversions: u64) -> VariantMetrics {
        VariantMetrics {
            impressions,
            conversions,
            revenue: 0.0,
        }
    }

    #[test]
    fn test_confidence_breakpoints() {
        assert_eq!(confidence_from_z(3.0), 0.99);
        assert_eq!(confidence_from_z(2.58), 0.95);
        assert_eq!(confidence_from_z(2.0), 0.95);
        assert_eq!(confidence_from_z(1.96), 0.90);
        assert_eq!(confidence_from_z(1.7), 0.90);
        assert_eq!(confidence_from_z(0.0), 0.50);
        assert!((confidence_from_z(0.825) - 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_scenario_forty_ten_versus_thirty_five_twenty() {
        let result = compare(&[metrics(40, 10), metrics(35, 20)], 30).unwrap();
        assert_eq!(result.leader, 1);
        assert_eq!(result.runner_up, 0);
        assert!((result.pooled_rate - 0.4).abs() < 1e-12);
        assert!(result.z_score > 1.96, "z was {}", result.z_score);
        assert!(result.confidence >= 0.95);
    }

    #[test]
    fn test_requires_min_impressions_per_variant() {
        assert!(compare(&[metrics(40, 10), metrics(29, 20)], 30).is_none());
    }

    #[test]
    fn test_ineligible_variants_are_skipped() {
        let result = compare(&[metrics(5, 5), metrics(40, 4), metrics(40, 12)], 30).unwrap();
        assert_eq!(result.leader, 2);
        assert_eq!(result.runner_up, 1);
    }

    #[test]
    fn test_equal_rates_keep_declaration_order() {
        let result = compare(&[metrics(40, 10), metrics(40, 10)], 30).unwrap();
        assert_eq!(result.leader, 0);
        assert_eq!(result.z_score, 0.0);
        assert_eq!(result.confidence, 0.50);
    }

    #[test]
    fn test_zero_conversions_has_zero_standard_error() {
        let (z, pooled, se) = two_proportion_z(0, 50, 0, 50);
        assert_eq!((z, pooled, se), (0.0, 0.0, 0.0));
    }
}
