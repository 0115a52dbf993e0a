//! Segment classifier: picks each profile's primary segment from the
//! loaded rule set.

use crate::engine::RuleEngine;
use crate::metric::MetricId;
use crate::profile::PlayerProfile;
use crate::rules::{validate_rules, SegmentationRule};
use chrono::{DateTime, Utc};
use circuit_core::{MonetizationResult, PlayerSegment};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub segment: PlayerSegment,
    pub confidence: f64,
    /// Rule that produced the winning confidence, if any qualified.
    pub rule: Option<String>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            segment: PlayerSegment::Unknown,
            confidence: 0.0,
            rule: None,
        }
    }
}

pub struct SegmentClassifier {
    rules: Vec<SegmentationRule>,
    engine: RuleEngine,
    referenced: HashSet<MetricId>,
}

impl SegmentClassifier {
    /// Validate and load `rules`. Malformed rules are rejected here, never
    /// at classification time.
    pub fn new(rules: Vec<SegmentationRule>) -> MonetizationResult<Self> {
        validate_rules(&rules)?;
        let referenced = rules
            .iter()
            .flat_map(|r| r.criteria.iter().map(|c| c.metric.clone()))
            .collect();
        info!(rules = rules.len(), "Segment classifier initialized");
        Ok(Self {
            rules,
            engine: RuleEngine::new(),
            referenced,
        })
    }

    pub fn rules(&self) -> &[SegmentationRule] {
        &self.rules
    }

    pub fn referenced_metrics(&self) -> &HashSet<MetricId> {
        &self.referenced
    }

    /// Whether a mutation touching `metrics` can change the outcome.
    pub fn references_any(&self, metrics: &[MetricId]) -> bool {
        metrics.iter().any(|m| self.referenced.contains(m))
    }

    pub fn classify(&self, profile: &PlayerProfile) -> Classification {
        self.classify_at(profile, Utc::now())
    }

    /// Best confidence per segment over qualifying rules, then the global
    /// best. Ties go to the segment whose rule was declared first. When any
    /// exclusive rule qualifies, only exclusive rules are considered.
    pub fn classify_at(&self, profile: &PlayerProfile, now: DateTime<Utc>) -> Classification {
        let mut inclusive: Vec<(PlayerSegment, f64, &str)> = Vec::new();
        let mut exclusive: Vec<(PlayerSegment, f64, &str)> = Vec::new();

        for rule in &self.rules {
            let score = self.engine.evaluate(profile, rule, now);
            if !score.qualifies {
                continue;
            }
            let bucket = if rule.exclusive {
                &mut exclusive
            } else {
                &mut inclusive
            };
            match bucket.iter_mut().find(|(seg, _, _)| *seg == rule.segment) {
                Some(entry) if score.confidence > entry.1 => {
                    entry.1 = score.confidence;
                    entry.2 = rule.name.as_str();
                }
                Some(_) => {}
                None => bucket.push((rule.segment, score.confidence, rule.name.as_str())),
            }
        }

        let candidates = if exclusive.is_empty() {
            inclusive
        } else {
            exclusive
        };

        let mut best: Option<(PlayerSegment, f64, &str)> = None;
        for candidate in candidates {
            if best.map_or(true, |(_, conf, _)| candidate.1 > conf) {
                best = Some(candidate);
            }
        }

        match best {
            Some((segment, confidence, rule)) => Classification {
                segment,
                confidence,
                rule: Some(rule.to_string()),
            },
            None => {
                debug!(player_id = %profile.player_id, "No qualifying rule, segment unknown");
                Classification::unknown()
            }
        }
    }
}
