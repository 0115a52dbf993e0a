//! Revenue KPIs computed over a window of ledger events.

use chrono::{DateTime, Duration, Utc};
use circuit_core::{PlayerSegment, RevenueEvent, RevenueEventType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `hours` leading up to and including `now`.
    pub fn trailing_hours(hours: i64, now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::hours(hours),
            end: now + Duration::nanoseconds(1),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRevenue {
    pub experiment_id: String,
    pub variant_name: String,
    pub revenue: f64,
    pub conversions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueMetrics {
    pub window: TimeWindow,
    pub total_revenue: f64,
    /// Purchases plus accepted offers.
    pub purchase_revenue: f64,
    pub ad_revenue: f64,
    pub event_counts: BTreeMap<RevenueEventType, u64>,
    pub unique_players: u64,
    pub paying_players: u64,
    pub arpu: f64,
    pub arppu: f64,
    pub conversion_rate: f64,
    pub revenue_by_segment: BTreeMap<PlayerSegment, f64>,
    pub revenue_by_variant: Vec<VariantRevenue>,
}

impl RevenueMetrics {
    pub fn count(&self, event_type: RevenueEventType) -> u64 {
        self.event_counts.get(&event_type).copied().unwrap_or(0)
    }

    /// Fold the events that fall inside `window`.
    pub fn compute<'a, I>(window: TimeWindow, events: I) -> Self
    where
        I: IntoIterator<Item = &'a RevenueEvent>,
    {
        let mut total_revenue = 0.0;
        let mut purchase_revenue = 0.0;
        let mut ad_revenue = 0.0;
        let mut event_counts = BTreeMap::new();
        let mut players = HashSet::new();
        let mut payers = HashSet::new();
        let mut revenue_by_segment = BTreeMap::new();
        let mut by_variant: BTreeMap<(String, String), (f64, u64)> = BTreeMap::new();

        for event in events.into_iter().filter(|e| window.contains(e.timestamp)) {
            *event_counts.entry(event.event_type).or_insert(0u64) += 1;
            players.insert(event.player_id.as_str());

            if !event.event_type.is_monetary() {
                continue;
            }
            let revenue = event.revenue.max(0.0);
            total_revenue += revenue;
            match event.event_type {
                RevenueEventType::AdCompleted => ad_revenue += revenue,
                _ => {
                    purchase_revenue += revenue;
                    if revenue > 0.0 {
                        payers.insert(event.player_id.as_str());
                    }
                }
            }
            let segment = event.segment.unwrap_or(PlayerSegment::Unknown);
            *revenue_by_segment.entry(segment).or_insert(0.0) += revenue;

            if let Some(variant) = &event.variant {
                let slot = by_variant
                    .entry((variant.experiment_id.clone(), variant.variant_name.clone()))
                    .or_insert((0.0, 0));
                slot.0 += revenue;
                if event.event_type != RevenueEventType::AdCompleted {
                    slot.1 += 1;
                }
            }
        }

        let unique_players = players.len() as u64;
        let paying_players = payers.len() as u64;
        let ratio = |num: f64, den: u64| if den == 0 { 0.0 } else { num / den as f64 };

        Self {
            window,
            total_revenue,
            purchase_revenue,
            ad_revenue,
            event_counts,
            unique_players,
            paying_players,
            arpu: ratio(total_revenue, unique_players),
            arppu: ratio(purchase_revenue, paying_players),
            conversion_rate: ratio(paying_players as f64, unique_players),
            revenue_by_segment,
            revenue_by_variant: by_variant
                .into_iter()
                .map(|((experiment_id, variant_name), (revenue, conversions))| VariantRevenue {
                    experiment_id,
                    variant_name,
                    revenue,
                    conversions,
                })
                .collect(),
        }
    }
}
