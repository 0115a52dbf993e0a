//! Rule builder: fluent API for constructing segmentation rules, plus the
//! built-in rule set derived from configured thresholds.

use crate::metric::MetricId;
use crate::predicates::Condition;
use crate::rules::{Criterion, SegmentationRule};
use circuit_core::config::SegmentationConfig;
use circuit_core::PlayerSegment;

pub struct RuleBuilder {
    name: String,
    segment: PlayerSegment,
    criteria: Vec<Criterion>,
    min_confidence: f64,
    exclusive: bool,
}

impl RuleBuilder {
    pub fn new(name: impl Into<String>, segment: PlayerSegment) -> Self {
        Self {
            name: name.into(),
            segment,
            criteria: Vec::new(),
            min_confidence: 1.0,
            exclusive: false,
        }
    }

    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn criterion(mut self, metric: MetricId, condition: Condition, weight: f64) -> Self {
        self.criteria.push(Criterion {
            metric,
            condition,
            weight,
        });
        self
    }

    pub fn greater_than(self, metric: MetricId, value: f64, weight: f64) -> Self {
        self.criterion(metric, Condition::GreaterThan { value }, weight)
    }

    pub fn less_than(self, metric: MetricId, value: f64, weight: f64) -> Self {
        self.criterion(metric, Condition::LessThan { value }, weight)
    }

    pub fn equals(self, metric: MetricId, value: f64, weight: f64) -> Self {
        self.criterion(metric, Condition::Equals { value }, weight)
    }

    pub fn between(self, metric: MetricId, min: f64, max: f64, weight: f64) -> Self {
        self.criterion(metric, Condition::Between { min, max }, weight)
    }

    pub fn contains(self, metric: MetricId, value: impl Into<String>, weight: f64) -> Self {
        self.criterion(
            metric,
            Condition::Contains {
                value: value.into(),
            },
            weight,
        )
    }

    pub fn build(self) -> SegmentationRule {
        SegmentationRule {
            name: self.name,
            segment: self.segment,
            criteria: self.criteria,
            min_confidence: self.min_confidence,
            exclusive: self.exclusive,
        }
    }
}

/// Built-in rules in declaration order. Spending rules come first so that
/// they win confidence ties against behavioral rules.
pub fn default_rules(config: &SegmentationConfig) -> Vec<SegmentationRule> {
    let whale = config.whale_spending_threshold;
    let dolphin = config.dolphin_spending_threshold;
    let new_sessions = f64::from(config.new_player_sessions);

    vec![
        RuleBuilder::new("at_risk", PlayerSegment::AtRisk)
            .greater_than(MetricId::ChurnRisk, config.at_risk_churn_threshold, 1.0)
            .exclusive()
            .build(),
        RuleBuilder::new("whale", PlayerSegment::Whale)
            .greater_than(MetricId::LifetimeValue, whale, 1.0)
            .build(),
        RuleBuilder::new("dolphin", PlayerSegment::Dolphin)
            .between(MetricId::LifetimeValue, dolphin, whale, 1.0)
            .build(),
        RuleBuilder::new("low_spender", PlayerSegment::LowSpender)
            .between(MetricId::LifetimeValue, 0.01, dolphin, 1.0)
            .build(),
        RuleBuilder::new("competitive", PlayerSegment::Competitive)
            .greater_than(
                MetricId::Attribute("ranked_games_played".into()),
                config.competitive_ranked_games,
                0.7,
            )
            .greater_than(MetricId::AverageSessionMinutes, 20.0, 0.3)
            .min_confidence(0.7)
            .build(),
        RuleBuilder::new("social", PlayerSegment::Social)
            .greater_than(
                MetricId::Attribute("friends_invited".into()),
                config.social_friends_invited,
                0.7,
            )
            .greater_than(MetricId::Attribute("guild_member".into()), 0.0, 0.3)
            .min_confidence(0.7)
            .build(),
        RuleBuilder::new("casual", PlayerSegment::Casual)
            .less_than(
                MetricId::AverageSessionMinutes,
                config.casual_session_minutes,
                0.6,
            )
            .greater_than(MetricId::SessionCount, new_sessions - 1.0, 0.4)
            .build(),
        RuleBuilder::new("non_spender", PlayerSegment::NonSpender)
            .equals(MetricId::PurchaseCount, 0.0, 0.5)
            .greater_than(MetricId::SessionCount, new_sessions - 1.0, 0.5)
            .build(),
        RuleBuilder::new("new_player", PlayerSegment::NewPlayer)
            .less_than(MetricId::SessionCount, new_sessions, 1.0)
            .build(),
    ]
}
