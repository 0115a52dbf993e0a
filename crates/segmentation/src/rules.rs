//! Segmentation rules: weighted threshold criteria targeting one segment.

use crate::metric::MetricId;
use crate::predicates::Condition;
use circuit_core::{MonetizationError, MonetizationResult, PlayerSegment};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub metric: MetricId,
    pub condition: Condition,
    pub weight: f64,
}

/// Immutable once loaded. Weights need not sum to 1; the rule engine
/// normalizes by total weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationRule {
    pub name: String,
    pub segment: PlayerSegment,
    pub criteria: Vec<Criterion>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// A qualifying exclusive rule shadows every non-exclusive match.
    #[serde(default)]
    pub exclusive: bool,
}

fn default_min_confidence() -> f64 {
    1.0
}

impl SegmentationRule {
    pub fn total_weight(&self) -> f64 {
        self.criteria.iter().map(|c| c.weight).sum()
    }

    pub fn validate(&self) -> MonetizationResult<()> {
        let invalid = |reason: &str| MonetizationError::InvalidRule {
            rule: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("rule name is empty"));
        }
        if self.criteria.is_empty() {
            return Err(invalid("rule has no criteria"));
        }
        for criterion in &self.criteria {
            if !(0.0..=1.0).contains(&criterion.weight) {
                return Err(MonetizationError::InvalidRuleWeight {
                    rule: self.name.clone(),
                    weight: criterion.weight,
                });
            }
            if let Condition::Between { min, max } = &criterion.condition {
                if min > max {
                    return Err(invalid(&format!(
                        "between bounds inverted on '{}': {min} > {max}",
                        criterion.metric
                    )));
                }
            }
        }
        if self.total_weight() <= 0.0 {
            return Err(invalid("criteria weights sum to zero"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(invalid("min_confidence must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Validate a whole rule set: every rule individually, and unique names.
pub fn validate_rules(rules: &[SegmentationRule]) -> MonetizationResult<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.name.as_str()) {
            return Err(MonetizationError::InvalidRule {
                rule: rule.name.clone(),
                reason: "duplicate rule name".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RuleBuilder;

    #[test]
    fn test_rejects_weight_above_one() {
        let rule = RuleBuilder::new("whale", PlayerSegment::Whale)
            .greater_than(MetricId::LifetimeValue, 200.0, 1.5)
            .build();
        assert!(matches!(
            rule.validate(),
            Err(MonetizationError::InvalidRuleWeight { weight, .. }) if weight == 1.5
        ));
    }

    #[test]
    fn test_rejects_negative_weight() {
        let rule = RuleBuilder::new("whale", PlayerSegment::Whale)
            .greater_than(MetricId::LifetimeValue, 200.0, -0.1)
            .build();
        assert!(matches!(
            rule.validate(),
            Err(MonetizationError::InvalidRuleWeight { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_total_weight() {
        let rule = RuleBuilder::new("empty", PlayerSegment::Casual)
            .greater_than(MetricId::SessionCount, 1.0, 0.0)
            .build();
        assert!(matches!(
            rule.validate(),
            Err(MonetizationError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let rule = RuleBuilder::new("whale", PlayerSegment::Whale)
            .greater_than(MetricId::LifetimeValue, 200.0, 1.0)
            .build();
        let err = validate_rules(&[rule.clone(), rule]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_deserialize_rule_from_catalog_json() {
        let json = r#"{
            "name": "competitive",
            "segment": "competitive",
            "criteria": [
                {"metric": "rankedGamesPlayed", "condition": {"op": ">", "value": 20}, "weight": 0.7},
                {"metric": "average_session_minutes", "condition": {"op": ">", "value": 20}, "weight": 0.3}
            ],
            "min_confidence": 0.7
        }"#;
        let rule: SegmentationRule = serde_json::from_str(json).unwrap();
        assert!(rule.validate().is_ok());
        assert!(!rule.exclusive);
        assert_eq!(
            rule.criteria[0].metric,
            MetricId::Attribute("ranked_games_played".into())
        );
        assert!((rule.total_weight() - 1.0).abs() < 1e-12);
    }
}
