//! Rule engine: scores a profile against one segmentation rule.

use crate::metric::{self, MetricId};
use crate::profile::PlayerProfile;
use crate::rules::SegmentationRule;
use chrono::{DateTime, Utc};
use circuit_core::MonetizationError;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleScore {
    /// Weighted share of satisfied criteria, in `[0, 1]`.
    pub confidence: f64,
    /// Whether `confidence` reached the rule's minimum.
    pub qualifies: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Each criterion scores 0 or 1; the rule's confidence is the
    /// weight-normalized sum. A criterion naming an attribute the profile
    /// lacks scores 0.
    pub fn evaluate(
        &self,
        profile: &PlayerProfile,
        rule: &SegmentationRule,
        now: DateTime<Utc>,
    ) -> RuleScore {
        let total_weight = rule.total_weight();
        if total_weight <= 0.0 {
            return RuleScore {
                confidence: 0.0,
                qualifies: false,
            };
        }

        let matched: f64 = rule
            .criteria
            .iter()
            .filter(|c| self.criterion_matches(profile, &c.metric, &c.condition, now))
            .map(|c| c.weight)
            .sum();

        let confidence = (matched / total_weight).clamp(0.0, 1.0);
        RuleScore {
            confidence,
            qualifies: confidence >= rule.min_confidence,
        }
    }

    fn criterion_matches(
        &self,
        profile: &PlayerProfile,
        metric: &MetricId,
        condition: &crate::predicates::Condition,
        now: DateTime<Utc>,
    ) -> bool {
        match metric::extract(profile, metric, now) {
            Ok(value) => condition.matches(&value),
            Err(MonetizationError::UnknownMetric(name)) => {
                debug!(
                    player_id = %profile.player_id,
                    metric = %name,
                    "Unknown metric in rule criterion, scoring 0"
                );
                false
            }
            Err(_) => false,
        }
    }
}
