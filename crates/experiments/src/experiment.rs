//! Experiment definitions, variant metrics and the status state machine.

use crate::stats::{self, SignificanceResult};
use chrono::{DateTime, Utc};
use circuit_core::{MonetizationError, MonetizationResult, VariantRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Draft, Self::Cancelled)
                | (Self::Active, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub price_multiplier: f64,
    #[serde(default)]
    pub display_label: Option<String>,
}

impl Variant {
    pub fn new(name: impl Into<String>, price_multiplier: f64) -> Self {
        Self {
            name: name.into(),
            price_multiplier,
            display_label: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub impressions: u64,
    pub conversions: u64,
    pub revenue: f64,
}

impl VariantMetrics {
    pub fn conversion_rate(&self) -> f64 {
        stats::conversion_rate(self.conversions, self.impressions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Auto-promotion after reaching sample size and confidence.
    Significance,
    /// The end timestamp passed.
    EndDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    /// Products whose price this experiment controls.
    #[serde(default)]
    pub product_ids: Vec<String>,
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    #[serde(default)]
    pub auto_promote_winner: bool,
    /// One entry per variant, in declaration order.
    #[serde(default)]
    pub metrics: Vec<VariantMetrics>,
    #[serde(default)]
    pub winner: Option<usize>,
    #[serde(default)]
    pub completion_reason: Option<CompletionReason>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_significance: Option<SignificanceResult>,
}

fn default_min_sample_size() -> u64 {
    100
}

impl Experiment {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        variants: Vec<Variant>,
        end_at: DateTime<Utc>,
    ) -> Self {
        let metrics = vec![VariantMetrics::default(); variants.len()];
        Self {
            id: id.into(),
            name: name.into(),
            product_ids: Vec::new(),
            variants,
            status: ExperimentStatus::Draft,
            start_at: None,
            end_at,
            min_sample_size: default_min_sample_size(),
            auto_promote_winner: false,
            metrics,
            winner: None,
            completion_reason: None,
            completed_at: None,
            last_significance: None,
        }
    }

    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_ids = products.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_sample_size(mut self, min_sample_size: u64) -> Self {
        self.min_sample_size = min_sample_size;
        self
    }

    pub fn with_auto_promote(mut self, auto_promote_winner: bool) -> Self {
        self.auto_promote_winner = auto_promote_winner;
        self
    }

    /// Static-configuration checks, run when the experiment is loaded.
    pub fn validate(&self) -> MonetizationResult<()> {
        let invalid = |reason: String| MonetizationError::InvalidExperiment {
            experiment: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("experiment id is empty".into()));
        }
        if self.variants.len() < 2 {
            return Err(invalid(format!(
                "needs at least two variants, found {}",
                self.variants.len()
            )));
        }
        let mut names = HashSet::new();
        for variant in &self.variants {
            if !names.insert(variant.name.as_str()) {
                return Err(invalid(format!("duplicate variant '{}'", variant.name)));
            }
            if !variant.price_multiplier.is_finite() || variant.price_multiplier <= 0.0 {
                return Err(invalid(format!(
                    "variant '{}' has non-positive multiplier {}",
                    variant.name, variant.price_multiplier
                )));
            }
        }
        let mut products = HashSet::new();
        for product in &self.product_ids {
            if !products.insert(product.as_str()) {
                return Err(invalid(format!("product '{product}' listed twice")));
            }
        }
        if !self.metrics.is_empty() && self.metrics.len() != self.variants.len() {
            return Err(invalid("metrics do not line up with variants".into()));
        }
        if let Some(start_at) = self.start_at {
            if start_at >= self.end_at {
                return Err(invalid("start_at is not before end_at".into()));
            }
        }
        Ok(())
    }

    pub fn total_impressions(&self) -> u64 {
        self.metrics.iter().map(|m| m.impressions).sum()
    }

    pub fn total_conversions(&self) -> u64 {
        self.metrics.iter().map(|m| m.conversions).sum()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_at
    }

    pub fn claims(&self, product_id: &str) -> bool {
        self.product_ids.iter().any(|p| p == product_id)
    }

    /// First product both experiments claim.
    pub fn shared_product<'a>(&'a self, other: &Experiment) -> Option<&'a str> {
        self.product_ids
            .iter()
            .find(|p| other.claims(p))
            .map(String::as_str)
    }

    /// Highest conversion rate, ties to the first declared variant. `None`
    /// when no variant ever converted.
    pub fn leading_variant(&self) -> Option<usize> {
        if self.total_conversions() == 0 {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        for (index, metrics) in self.metrics.iter().enumerate() {
            let rate = metrics.conversion_rate();
            if best.map_or(true, |(_, best_rate)| rate > best_rate) {
                best = Some((index, rate));
            }
        }
        best.map(|(index, _)| index)
    }

    pub fn variant_ref(&self, index: usize) -> Option<VariantRef> {
        self.variants.get(index).map(|v| VariantRef {
            experiment_id: self.id.clone(),
            variant_index: index,
            variant_name: v.name.clone(),
        })
    }

    pub(crate) fn transition(&mut self, next: ExperimentStatus) -> MonetizationResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(MonetizationError::InvalidTransition {
                experiment: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Reject a product claimed by more than one non-terminal experiment.
pub fn validate_product_overlap(experiments: &[Experiment]) -> MonetizationResult<()> {
    let live: Vec<&Experiment> = experiments
        .iter()
        .filter(|e| !e.status.is_terminal())
        .collect();
    for (i, first) in live.iter().enumerate() {
        for second in &live[i + 1..] {
            if let Some(product) = second.shared_product(first) {
                return Err(MonetizationError::InvalidExperiment {
                    experiment: second.id.clone(),
                    reason: format!("product '{product}' already claimed by '{}'", first.id),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub name: String,
    pub price_multiplier: f64,
    pub impressions: u64,
    pub conversions: u64,
    pub revenue: f64,
    pub conversion_rate: f64,
}

/// Outcome reported when an experiment completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment_id: String,
    pub winner: Option<VariantRef>,
    pub reason: CompletionReason,
    pub confidence: Option<f64>,
    pub variants: Vec<VariantSummary>,
    pub completed_at: DateTime<Utc>,
}

impl ExperimentResult {
    pub(crate) fn from_experiment(experiment: &Experiment) -> Option<Self> {
        Some(Self {
            experiment_id: experiment.id.clone(),
            winner: experiment.winner.and_then(|i| experiment.variant_ref(i)),
            reason: experiment.completion_reason?,
            confidence: experiment.last_significance.map(|s| s.confidence),
            variants: experiment
                .variants
                .iter()
                .zip(&experiment.metrics)
                .map(|(variant, metrics)| VariantSummary {
                    name: variant.name.clone(),
                    price_multiplier: variant.price_multiplier,
                    impressions: metrics.impressions,
                    conversions: metrics.conversions,
                    revenue: metrics.revenue,
                    conversion_rate: metrics.conversion_rate(),
                })
                .collect(),
            completed_at: experiment.completed_at?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn experiment() -> Experiment {
        Experiment::new(
            "gem-pack-price",
            "Gem pack price test",
            vec![Variant::new("control", 1.0), Variant::new("discount", 0.8)],
            Utc::now() + Duration::days(14),
        )
    }

    #[test]
    fn test_overlapping_live_experiments_rejected() {
        let first = experiment().with_products(["gems", "coins"]);
        let mut second = experiment().with_products(["coins"]);
        second.id = "coin-price".into();
        assert_eq!(second.shared_product(&first), Some("coins"));
        assert!(matches!(
            validate_product_overlap(&[first.clone(), second.clone()]),
            Err(MonetizationError::InvalidExperiment { experiment, .. }) if experiment == "coin-price"
        ));

        // A finished experiment no longer holds its products.
        let mut finished = first;
        finished.status = ExperimentStatus::Completed;
        assert!(validate_product_overlap(&[finished, second]).is_ok());
    }

    #[test]
    fn test_state_machine() {
        use ExperimentStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Draft.can_transition_to(Completed));
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn test_rejects_duplicate_variants() {
        let mut exp = experiment();
        exp.variants.push(Variant::new("control", 1.2));
        exp.metrics.push(VariantMetrics::default());
        assert!(matches!(
            exp.validate(),
            Err(MonetizationError::InvalidExperiment { .. })
        ));
    }

    #[test]
    fn test_rejects_single_variant_and_bad_multiplier() {
        let mut exp = experiment();
        exp.variants.truncate(1);
        exp.metrics.truncate(1);
        assert!(exp.validate().is_err());

        let mut exp = experiment();
        exp.variants[1].price_multiplier = 0.0;
        assert!(exp.validate().is_err());
    }

    #[test]
    fn test_leading_variant_ties_go_to_first_declared() {
        let mut exp = experiment();
        assert_eq!(exp.leading_variant(), None);

        exp.metrics[0] = VariantMetrics {
            impressions: 10,
            conversions: 2,
            revenue: 0.0,
        };
        exp.metrics[1] = VariantMetrics {
            impressions: 20,
            conversions: 4,
            revenue: 0.0,
        };
        assert_eq!(exp.leading_variant(), Some(0));

        exp.metrics[1].conversions = 5;
        assert_eq!(exp.leading_variant(), Some(1));
    }

    #[test]
    fn test_deserialize_from_catalog() {
        let json = r#"{
            "id": "starter-pack",
            "name": "Starter pack pricing",
            "product_ids": ["starter_pack"],
            "variants": [
                {"name": "control", "price_multiplier": 1.0},
                {"name": "premium", "price_multiplier": 1.2, "display_label": "Best value"}
            ],
            "end_at": "2030-01-01T00:00:00Z",
            "auto_promote_winner": true
        }"#;
        let exp: Experiment = serde_json::from_str(json).unwrap();
        assert_eq!(exp.status, ExperimentStatus::Draft);
        assert_eq!(exp.min_sample_size, 100);
        assert!(exp.metrics.is_empty());
        assert!(exp.validate().is_ok());
        assert!(exp.claims("starter_pack"));
    }
}
