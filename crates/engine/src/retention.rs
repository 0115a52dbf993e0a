//! Comeback rewards for players drifting toward churn.

use chrono::{DateTime, Duration, Utc};
use circuit_analytics::RevenueLedger;
use circuit_core::config::RetentionConfig;
use circuit_core::event_bus::SegmentObserver;
use circuit_core::{PlayerSegment, RevenueEvent, RevenueEventType, SegmentChange};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// The game's economy backend. Calls are fire-and-forget.
pub trait EconomyService: Send + Sync {
    fn add_currency(&self, player_id: &str, amount: u64);
    fn refill_energy(&self, player_id: &str);
    fn grant_premium_account(&self, player_id: &str, duration: Duration);
}

/// Economy that only logs grants. Used when no backend is wired in.
#[derive(Debug, Default)]
pub struct LoggingEconomy;

impl EconomyService for LoggingEconomy {
    fn add_currency(&self, player_id: &str, amount: u64) {
        info!(player_id = %player_id, amount, "Currency granted");
    }

    fn refill_energy(&self, player_id: &str) {
        info!(player_id = %player_id, "Energy refilled");
    }

    fn grant_premium_account(&self, player_id: &str, duration: Duration) {
        info!(player_id = %player_id, hours = duration.num_hours(), "Premium account granted");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    Currency { player_id: String, amount: u64 },
    Energy { player_id: String },
    Premium { player_id: String, duration: Duration },
}

/// Economy that remembers every grant, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingEconomy {
    grants: Mutex<Vec<Grant>>,
}

impl RecordingEconomy {
    pub fn grants(&self) -> Vec<Grant> {
        self.grants.lock().clone()
    }

    pub fn grants_for(&self, player_id: &str) -> usize {
        self.grants
            .lock()
            .iter()
            .filter(|g| match g {
                Grant::Currency { player_id: p, .. }
                | Grant::Energy { player_id: p }
                | Grant::Premium { player_id: p, .. } => p == player_id,
            })
            .count()
    }
}

impl EconomyService for RecordingEconomy {
    fn add_currency(&self, player_id: &str, amount: u64) {
        self.grants.lock().push(Grant::Currency {
            player_id: player_id.to_string(),
            amount,
        });
    }

    fn refill_energy(&self, player_id: &str) {
        self.grants.lock().push(Grant::Energy {
            player_id: player_id.to_string(),
        });
    }

    fn grant_premium_account(&self, player_id: &str, duration: Duration) {
        self.grants.lock().push(Grant::Premium {
            player_id: player_id.to_string(),
            duration,
        });
    }
}

/// Grants a comeback bundle at most once per cooldown per player.
pub struct RetentionPolicy {
    config: RetentionConfig,
    economy: Arc<dyn EconomyService>,
    ledger: Arc<RevenueLedger>,
    last_reward: DashMap<String, DateTime<Utc>>,
}

impl RetentionPolicy {
    pub fn new(
        config: RetentionConfig,
        economy: Arc<dyn EconomyService>,
        ledger: Arc<RevenueLedger>,
    ) -> Self {
        Self {
            config,
            economy,
            ledger,
            last_reward: DashMap::new(),
        }
    }

    /// Reward the player if they are at risk by segment or churn score.
    pub fn consider(
        &self,
        player_id: &str,
        segment: PlayerSegment,
        churn_risk: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if segment != PlayerSegment::AtRisk && churn_risk < self.config.churn_reward_threshold {
            return false;
        }
        self.reward(player_id, segment, now)
    }

    fn reward(&self, player_id: &str, segment: PlayerSegment, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }
        let cooldown = Duration::hours(self.config.cooldown_hours);
        match self.last_reward.entry(player_id.to_string()) {
            Entry::Occupied(mut last) => {
                if now < *last.get() + cooldown {
                    return false;
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        if self.config.comeback_currency > 0 {
            self.economy.add_currency(player_id, self.config.comeback_currency);
        }
        if self.config.refill_energy {
            self.economy.refill_energy(player_id);
        }
        if self.config.premium_hours > 0 {
            self.economy
                .grant_premium_account(player_id, Duration::hours(self.config.premium_hours));
        }

        self.ledger.record(
            RevenueEvent::new(player_id, RevenueEventType::RetentionReward, 0.0, now)
                .with_segment(segment),
        );
        metrics::counter!("retention.rewards").increment(1);
        info!(player_id = %player_id, segment = %segment, "Comeback bundle granted");
        true
    }
}

impl SegmentObserver for RetentionPolicy {
    fn on_segment_changed(&self, change: &SegmentChange) {
        if change.current == PlayerSegment::AtRisk {
            self.reward(&change.player_id, change.current, change.changed_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuit_core::config::RetentionConfig;

    fn policy(config: RetentionConfig) -> (RetentionPolicy, Arc<RecordingEconomy>, Arc<RevenueLedger>) {
        let economy = Arc::new(RecordingEconomy::default());
        let ledger = Arc::new(RevenueLedger::new(100));
        let policy = RetentionPolicy::new(config, economy.clone(), ledger.clone());
        (policy, economy, ledger)
    }

    #[test]
    fn test_reward_respects_cooldown() {
        let (policy, economy, ledger) = policy(RetentionConfig::default());
        let now = Utc::now();

        assert!(policy.consider("p1", PlayerSegment::Casual, 0.8, now));
        assert!(!policy.consider("p1", PlayerSegment::Casual, 0.9, now + Duration::hours(1)));
        assert!(policy.consider("p1", PlayerSegment::AtRisk, 0.9, now + Duration::hours(73)));

        // Currency, energy and premium per grant.
        assert_eq!(economy.grants_for("p1"), 6);
        let rewards = ledger.snapshot();
        assert_eq!(rewards.len(), 2);
        assert!(rewards
            .iter()
            .all(|e| e.event_type == RevenueEventType::RetentionReward && e.revenue == 0.0));
    }

    #[test]
    fn test_low_risk_players_are_not_rewarded() {
        let (policy, economy, _) = policy(RetentionConfig::default());
        assert!(!policy.consider("p1", PlayerSegment::Whale, 0.3, Utc::now()));
        assert!(economy.grants().is_empty());
    }

    #[test]
    fn test_disabled_policy_grants_nothing() {
        let config = RetentionConfig {
            enabled: false,
            ..RetentionConfig::default()
        };
        let (policy, economy, ledger) = policy(config);
        assert!(!policy.consider("p1", PlayerSegment::AtRisk, 1.0, Utc::now()));
        assert!(economy.grants().is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_observer_reacts_to_at_risk_transition() {
        let (policy, economy, _) = policy(RetentionConfig::default());
        let change = |current| SegmentChange {
            player_id: "p1".into(),
            previous: PlayerSegment::Casual,
            current,
            confidence: 1.0,
            changed_at: Utc::now(),
        };
        policy.on_segment_changed(&change(PlayerSegment::Whale));
        assert!(economy.grants().is_empty());
        policy.on_segment_changed(&change(PlayerSegment::AtRisk));
        assert_eq!(
            economy.grants()[0],
            Grant::Currency {
                player_id: "p1".into(),
                amount: 100
            }
        );
    }
}
