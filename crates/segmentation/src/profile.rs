//! Player profiles and the store that owns them.
//!
//! Profiles are created on first observation and never removed. Every
//! mutation goes through a [`ProfileStore`] setter, which reclassifies the
//! profile when the mutation touched a metric the rule set reads and
//! publishes a [`SegmentChange`] when the segment value moved.

use crate::churn::ChurnModel;
use crate::classifier::SegmentClassifier;
use crate::metric::{normalize, MetricId};
use chrono::{DateTime, Duration, Utc};
use circuit_core::{PlayerSegment, SegmentChange, SegmentEventQueue};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Session start timestamps kept per profile for frequency scoring.
const MAX_SESSION_HISTORY: usize = 64;

/// Longest session accepted unless the store is configured otherwise.
pub const DEFAULT_MAX_SESSION_MINUTES: f64 = 720.0;

/// End of a session, or its start when the duration cannot be represented.
pub fn session_end(started_at: DateTime<Utc>, minutes: f64) -> DateTime<Utc> {
    Duration::try_milliseconds((minutes * 60_000.0) as i64)
        .and_then(|length| started_at.checked_add_signed(length))
        .unwrap_or(started_at)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub region: Option<String>,
    pub lifetime_value: f64,
    pub purchase_count: u32,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub session_count: u32,
    pub session_starts: VecDeque<DateTime<Utc>>,
    pub average_session_minutes: f64,
    pub total_play_minutes: f64,
    pub ads_watched: u32,
    pub churn_risk: f64,
    pub segment: PlayerSegment,
    pub segment_confidence: f64,
    pub attributes: BTreeMap<String, f64>,
    pub tags: BTreeSet<String>,
}

impl PlayerProfile {
    pub fn new(player_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            player_id: player_id.into(),
            created_at: now,
            last_seen: now,
            region: None,
            lifetime_value: 0.0,
            purchase_count: 0,
            last_purchase_at: None,
            session_count: 0,
            session_starts: VecDeque::new(),
            average_session_minutes: 0.0,
            total_play_minutes: 0.0,
            ads_watched: 0,
            churn_risk: 0.0,
            segment: PlayerSegment::default(),
            segment_confidence: 0.0,
            attributes: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn is_payer(&self) -> bool {
        self.purchase_count > 0
    }

    /// Whether the player had a session starting at or after `at`.
    pub fn active_since(&self, at: DateTime<Utc>) -> bool {
        self.session_starts.iter().any(|start| *start >= at) || self.last_seen >= at
    }
}

pub struct ProfileStore {
    profiles: DashMap<String, PlayerProfile>,
    classifier: Arc<SegmentClassifier>,
    churn: ChurnModel,
    events: Arc<SegmentEventQueue>,
    max_session_minutes: f64,
}

impl ProfileStore {
    pub fn new(
        classifier: Arc<SegmentClassifier>,
        churn: ChurnModel,
        events: Arc<SegmentEventQueue>,
    ) -> Self {
        Self {
            profiles: DashMap::new(),
            classifier,
            churn,
            events,
            max_session_minutes: DEFAULT_MAX_SESSION_MINUTES,
        }
    }

    pub fn with_max_session_minutes(mut self, max_session_minutes: f64) -> Self {
        self.max_session_minutes = max_session_minutes;
        self
    }

    /// Session lengths that are negative, non-finite or longer than the
    /// configured maximum are logged and counted as 0 minutes.
    pub fn sanitize_session_minutes(&self, player_id: &str, minutes: f64) -> f64 {
        if minutes.is_finite() && (0.0..=self.max_session_minutes).contains(&minutes) {
            return minutes;
        }
        warn!(
            player_id = %player_id,
            minutes,
            max = self.max_session_minutes,
            "Ignoring implausible session length"
        );
        0.0
    }

    pub fn classifier(&self) -> &SegmentClassifier {
        &self.classifier
    }

    pub fn events(&self) -> &Arc<SegmentEventQueue> {
        &self.events
    }

    /// Never fails: an unseen player gets a fresh profile.
    pub fn get_or_create(&self, player_id: &str) -> PlayerProfile {
        self.get_or_create_at(player_id, Utc::now())
    }

    pub fn get_or_create_at(&self, player_id: &str, now: DateTime<Utc>) -> PlayerProfile {
        self.profiles
            .entry(player_id.to_string())
            .or_insert_with(|| {
                debug!(player_id = %player_id, "Profile created");
                PlayerProfile::new(player_id, now)
            })
            .clone()
    }

    pub fn get(&self, player_id: &str) -> Option<PlayerProfile> {
        self.profiles.get(player_id).map(|p| p.clone())
    }

    /// Load a persisted profile, replacing any in-memory copy.
    pub fn restore(&self, profile: PlayerProfile) {
        self.profiles.insert(profile.player_id.clone(), profile);
    }

    pub fn snapshot(&self) -> Vec<PlayerProfile> {
        self.profiles.iter().map(|p| p.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn record_purchase(
        &self,
        player_id: &str,
        amount: f64,
        product_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> PlayerProfile {
        let amount = if amount.is_finite() && amount >= 0.0 {
            amount
        } else {
            warn!(player_id = %player_id, amount, "Ignoring invalid purchase amount");
            0.0
        };
        let churn = self.churn;
        self.mutate(
            player_id,
            now,
            &[
                MetricId::LifetimeValue,
                MetricId::PurchaseCount,
                MetricId::DaysSinceLastPurchase,
                MetricId::DaysSinceLastSession,
                MetricId::ChurnRisk,
                MetricId::Tags,
            ],
            |profile| {
                profile.lifetime_value += amount;
                profile.purchase_count += 1;
                profile.last_purchase_at = Some(now);
                profile.last_seen = profile.last_seen.max(now);
                if let Some(product_id) = product_id {
                    profile.tags.insert(product_id.to_string());
                }
                profile.churn_risk = churn.score(profile, now);
            },
        )
    }

    pub fn record_session(
        &self,
        player_id: &str,
        started_at: DateTime<Utc>,
        minutes: f64,
    ) -> PlayerProfile {
        let minutes = self.sanitize_session_minutes(player_id, minutes);
        let ended_at = session_end(started_at, minutes);
        let churn = self.churn;
        self.mutate(
            player_id,
            ended_at,
            &[
                MetricId::SessionCount,
                MetricId::AverageSessionMinutes,
                MetricId::TotalPlayMinutes,
                MetricId::DaysSinceLastSession,
                MetricId::ChurnRisk,
            ],
            |profile| {
                profile.session_count += 1;
                profile.total_play_minutes += minutes;
                profile.average_session_minutes =
                    profile.total_play_minutes / f64::from(profile.session_count);
                profile.session_starts.push_back(started_at);
                while profile.session_starts.len() > MAX_SESSION_HISTORY {
                    profile.session_starts.pop_front();
                }
                profile.last_seen = profile.last_seen.max(ended_at);
                profile.churn_risk = churn.score(profile, ended_at);
            },
        )
    }

    pub fn record_ad_watched(&self, player_id: &str, now: DateTime<Utc>) -> PlayerProfile {
        self.mutate(player_id, now, &[MetricId::AdsWatched], |profile| {
            profile.ads_watched += 1;
        })
    }

    /// Set a host-defined numeric attribute such as `ranked_games_played`.
    pub fn set_attribute(
        &self,
        player_id: &str,
        name: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> PlayerProfile {
        let key = normalize(name);
        let metric = MetricId::Attribute(key.clone());
        self.mutate(player_id, now, &[metric], |profile| {
            profile.attributes.insert(key, value);
        })
    }

    pub fn increment_attribute(
        &self,
        player_id: &str,
        name: &str,
        delta: f64,
        now: DateTime<Utc>,
    ) -> PlayerProfile {
        let key = normalize(name);
        let metric = MetricId::Attribute(key.clone());
        self.mutate(player_id, now, &[metric], |profile| {
            *profile.attributes.entry(key).or_insert(0.0) += delta;
        })
    }

    pub fn set_region(&self, player_id: &str, region: &str, now: DateTime<Utc>) -> PlayerProfile {
        let region = region.trim().to_ascii_uppercase();
        self.mutate(player_id, now, &[MetricId::Region], |profile| {
            profile.region = Some(region);
        })
    }

    pub fn add_tag(&self, player_id: &str, tag: &str, now: DateTime<Utc>) -> PlayerProfile {
        self.mutate(player_id, now, &[MetricId::Tags], |profile| {
            profile.tags.insert(tag.to_string());
        })
    }

    pub fn set_churn_risk(&self, player_id: &str, risk: f64, now: DateTime<Utc>) -> PlayerProfile {
        let risk = if risk.is_finite() { risk.clamp(0.0, 1.0) } else { 0.0 };
        self.mutate(player_id, now, &[MetricId::ChurnRisk], |profile| {
            profile.churn_risk = risk;
        })
    }

    /// Recompute churn risk for every profile and reclassify it, since
    /// recency metrics move with the clock. Returns the number of segment
    /// changes published.
    pub fn refresh_churn(&self, now: DateTime<Utc>) -> usize {
        let mut changes = Vec::new();
        for mut entry in self.profiles.iter_mut() {
            let profile = entry.value_mut();
            profile.churn_risk = self.churn.score(profile, now);
            if let Some(change) = self.reclassify(profile, now) {
                changes.push(change);
            }
        }
        let count = changes.len();
        for change in changes {
            self.events.publish(change);
        }
        debug!(profiles = self.profiles.len(), changes = count, "Churn refresh complete");
        count
    }

    fn mutate<F>(
        &self,
        player_id: &str,
        now: DateTime<Utc>,
        touched: &[MetricId],
        apply: F,
    ) -> PlayerProfile
    where
        F: FnOnce(&mut PlayerProfile),
    {
        let (snapshot, change) = {
            let mut entry = self
                .profiles
                .entry(player_id.to_string())
                .or_insert_with(|| PlayerProfile::new(player_id, now));
            let profile = entry.value_mut();
            apply(profile);
            let change = if self.classifier.references_any(touched) {
                self.reclassify(profile, now)
            } else {
                None
            };
            (profile.clone(), change)
        };
        // Published after the shard guard is released so observers may read
        // the store.
        if let Some(change) = change {
            self.events.publish(change);
        }
        snapshot
    }

    /// The old segment stays on the profile until the new one is written.
    fn reclassify(&self, profile: &mut PlayerProfile, now: DateTime<Utc>) -> Option<SegmentChange> {
        let classification = self.classifier.classify_at(profile, now);
        let previous = profile.segment;
        profile.segment = classification.segment;
        profile.segment_confidence = classification.confidence;

        if previous == classification.segment {
            return None;
        }
        debug!(
            player_id = %profile.player_id,
            from = %previous,
            to = %classification.segment,
            confidence = classification.confidence,
            "Segment changed"
        );
        Some(SegmentChange {
            player_id: profile.player_id.clone(),
            previous,
            current: classification.segment,
            confidence: classification.confidence,
            changed_at: now,
        })
    }
}
