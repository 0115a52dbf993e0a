//! Periodic analytics: revenue KPIs from the ledger plus population health
//! from the profile store.

use crate::cohort::{self, RetentionPoint};
use crate::ledger::RevenueLedger;
use crate::revenue::{RevenueMetrics, TimeWindow};
use chrono::{DateTime, Utc};
use circuit_core::config::AnalyticsConfig;
use circuit_core::PlayerSegment;
use circuit_segmentation::PlayerProfile;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    LowConversion { rate: f64, threshold: f64 },
    HighChurnShare { share: f64, threshold: f64 },
    LedgerSaturated { fill_ratio: f64, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub len: usize,
    pub capacity: usize,
    pub total_recorded: u64,
    pub total_evicted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub revenue: RevenueMetrics,
    pub player_count: u64,
    pub segment_distribution: BTreeMap<PlayerSegment, u64>,
    pub average_churn_risk: f64,
    pub retention: Vec<RetentionPoint>,
    pub ledger: LedgerStats,
    pub alerts: Vec<Alert>,
}

pub struct AnalyticsAggregator {
    ledger: Arc<RevenueLedger>,
    config: AnalyticsConfig,
    latest: RwLock<Option<DashboardSnapshot>>,
}

impl AnalyticsAggregator {
    pub fn new(ledger: Arc<RevenueLedger>, config: AnalyticsConfig) -> Self {
        Self {
            ledger,
            config,
            latest: RwLock::new(None),
        }
    }

    pub fn ledger(&self) -> &Arc<RevenueLedger> {
        &self.ledger
    }

    /// The configured trailing window ending at `now`.
    pub fn default_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::trailing_hours(self.config.window_hours, now)
    }

    pub fn aggregate(&self, window: TimeWindow) -> RevenueMetrics {
        let events = self.ledger.snapshot();
        RevenueMetrics::compute(window, &events)
    }

    /// Build a full dashboard and keep it as the latest snapshot.
    pub fn dashboard(
        &self,
        window: TimeWindow,
        profiles: &[PlayerProfile],
        now: DateTime<Utc>,
    ) -> DashboardSnapshot {
        let revenue = self.aggregate(window);

        let mut segment_distribution = BTreeMap::new();
        let mut churn_total = 0.0;
        for profile in profiles {
            *segment_distribution.entry(profile.segment).or_insert(0u64) += 1;
            churn_total += profile.churn_risk;
        }
        let player_count = profiles.len() as u64;
        let average_churn_risk = if player_count == 0 {
            0.0
        } else {
            churn_total / player_count as f64
        };

        let ledger = LedgerStats {
            len: self.ledger.len(),
            capacity: self.ledger.capacity(),
            total_recorded: self.ledger.total_recorded(),
            total_evicted: self.ledger.total_evicted(),
        };

        let alerts = self.alerts(&revenue, &segment_distribution, player_count, &ledger);
        for alert in &alerts {
            warn!(alert = ?alert, "Analytics alert raised");
        }

        let snapshot = DashboardSnapshot {
            generated_at: now,
            retention: cohort::retention_curve(profiles, now),
            revenue,
            player_count,
            segment_distribution,
            average_churn_risk,
            ledger,
            alerts,
        };

        metrics::gauge!("analytics.arpu").set(snapshot.revenue.arpu);
        metrics::gauge!("analytics.conversion_rate").set(snapshot.revenue.conversion_rate);
        metrics::gauge!("analytics.players").set(player_count as f64);
        info!(
            players = player_count,
            revenue = snapshot.revenue.total_revenue,
            arpu = snapshot.revenue.arpu,
            alerts = snapshot.alerts.len(),
            "Dashboard aggregated"
        );

        *self.latest.write() = Some(snapshot.clone());
        snapshot
    }

    /// Last snapshot produced by [`dashboard`](Self::dashboard).
    pub fn latest(&self) -> Option<DashboardSnapshot> {
        self.latest.read().clone()
    }

    fn alerts(
        &self,
        revenue: &RevenueMetrics,
        segments: &BTreeMap<PlayerSegment, u64>,
        player_count: u64,
        ledger: &LedgerStats,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if revenue.unique_players > 0 && revenue.conversion_rate < self.config.low_conversion_alert {
            alerts.push(Alert::LowConversion {
                rate: revenue.conversion_rate,
                threshold: self.config.low_conversion_alert,
            });
        }

        if player_count > 0 {
            let at_risk = segments.get(&PlayerSegment::AtRisk).copied().unwrap_or(0);
            let share = at_risk as f64 / player_count as f64;
            if share >= self.config.high_churn_share_alert {
                alerts.push(Alert::HighChurnShare {
                    share,
                    threshold: self.config.high_churn_share_alert,
                });
            }
        }

        let fill_ratio = ledger.len as f64 / ledger.capacity as f64;
        if fill_ratio >= self.config.ledger_saturation_alert {
            alerts.push(Alert::LedgerSaturated {
                fill_ratio,
                threshold: self.config.ledger_saturation_alert,
            });
        }

        alerts
    }
}
