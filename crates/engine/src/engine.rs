//! The monetization facade. Owns every component and routes game events
//! through segmentation, experiments, pricing and the revenue ledger.

use crate::catalog::Catalog;
use crate::retention::{EconomyService, RetentionPolicy};
use crate::scheduler::Scheduler;
use chrono::{DateTime, Duration, Utc};
use circuit_analytics::{AnalyticsAggregator, DashboardSnapshot, RevenueLedger};
use circuit_core::{
    AppConfig, MonetizationError, MonetizationResult, RevenueEvent, RevenueEventType,
    SegmentChange, SegmentEventQueue,
};
use circuit_experiments::{ExperimentResult, ExperimentTracker, TrackOutcome};
use circuit_pricing::{PriceQuote, PricingComposer};
use circuit_segmentation::{
    session_end, ChurnModel, PlayerProfile, ProfileStore, SegmentClassifier,
};
use std::sync::Arc;
use tracing::{debug, info};

pub struct MonetizationEngine {
    config: AppConfig,
    catalog: Catalog,
    events: Arc<SegmentEventQueue>,
    profiles: Arc<ProfileStore>,
    experiments: Arc<ExperimentTracker>,
    pricing: Arc<PricingComposer>,
    ledger: Arc<RevenueLedger>,
    analytics: Arc<AnalyticsAggregator>,
    retention: Arc<RetentionPolicy>,
}

impl MonetizationEngine {
    /// Validate configuration and catalog, then wire every component.
    pub fn from_config(
        config: AppConfig,
        catalog: Catalog,
        economy: Arc<dyn EconomyService>,
    ) -> MonetizationResult<Self> {
        config.validate()?;
        catalog.validate()?;

        let classifier = SegmentClassifier::new(catalog.rules_or_default(&config.segmentation))?;
        let events = Arc::new(SegmentEventQueue::new());
        let profiles = Arc::new(ProfileStore::new(
            Arc::new(classifier),
            ChurnModel::new(config.segmentation.churn_inactive_days),
            Arc::clone(&events),
        )
        .with_max_session_minutes(config.segmentation.max_session_minutes));

        let experiments = Arc::new(ExperimentTracker::new(config.experiments.clone()));
        for experiment in &catalog.experiments {
            experiments.restore(experiment.clone())?;
        }

        let pricing = Arc::new(PricingComposer::new(
            config.pricing.clone(),
            Arc::clone(&experiments),
        ));
        let ledger = Arc::new(RevenueLedger::new(config.ledger.capacity));
        let analytics = Arc::new(AnalyticsAggregator::new(
            Arc::clone(&ledger),
            config.analytics.clone(),
        ));
        let retention = Arc::new(RetentionPolicy::new(
            config.retention.clone(),
            economy,
            Arc::clone(&ledger),
        ));
        if config.retention.enabled {
            events.subscribe(retention.clone());
        }

        info!(
            rules = profiles.classifier().rules().len(),
            experiments = catalog.experiments.len(),
            ledger_capacity = config.ledger.capacity,
            "Monetization engine initialized"
        );

        Ok(Self {
            config,
            catalog,
            events,
            profiles,
            experiments,
            pricing,
            ledger,
            analytics,
            retention,
        })
    }

    // ─── Game events ────────────────────────────────────────────────────

    pub fn on_session(
        &self,
        player_id: &str,
        started_at: DateTime<Utc>,
        minutes: f64,
    ) -> PlayerProfile {
        let minutes = self.profiles.sanitize_session_minutes(player_id, minutes);
        let profile = self.profiles.record_session(player_id, started_at, minutes);
        let ended_at = session_end(started_at, minutes);
        self.ledger.record(
            RevenueEvent::new(player_id, RevenueEventType::SessionStart, 0.0, started_at)
                .with_segment(profile.segment),
        );
        self.ledger.record(
            RevenueEvent::new(player_id, RevenueEventType::SessionEnd, 0.0, ended_at)
                .with_segment(profile.segment),
        );
        self.retention
            .consider(player_id, profile.segment, profile.churn_risk, ended_at);
        metrics::counter!("engine.sessions").increment(1);
        profile
    }

    pub fn on_purchase(
        &self,
        player_id: &str,
        product_id: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> MonetizationResult<PlayerProfile> {
        self.record_conversion(player_id, product_id, amount, RevenueEventType::Purchase, now)
    }

    pub fn on_offer_accepted(
        &self,
        player_id: &str,
        offer_id: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> MonetizationResult<PlayerProfile> {
        self.record_conversion(player_id, offer_id, amount, RevenueEventType::OfferAccepted, now)
    }

    pub fn on_offer_shown(&self, player_id: &str, offer_id: &str, now: DateTime<Utc>) {
        let segment = self.profiles.get_or_create_at(player_id, now).segment;
        self.ledger.record(
            RevenueEvent::new(player_id, RevenueEventType::OfferShown, 0.0, now)
                .with_product(offer_id)
                .with_segment(segment),
        );
    }

    /// Every ad request is an impression; only completed views pay out.
    pub fn on_ad_result(
        &self,
        player_id: &str,
        placement: &str,
        revenue: f64,
        completed: bool,
        now: DateTime<Utc>,
    ) {
        let profile = if completed {
            self.profiles.record_ad_watched(player_id, now)
        } else {
            self.profiles.get_or_create_at(player_id, now)
        };
        self.ledger.record(
            RevenueEvent::new(player_id, RevenueEventType::AdImpression, 0.0, now)
                .with_product(placement)
                .with_segment(profile.segment),
        );
        if completed {
            let revenue = if revenue.is_finite() { revenue.max(0.0) } else { 0.0 };
            self.ledger.record(
                RevenueEvent::new(player_id, RevenueEventType::AdCompleted, revenue, now)
                    .with_product(placement)
                    .with_segment(profile.segment),
            );
        }
        metrics::counter!("engine.ad_results", "completed" => completed.to_string()).increment(1);
    }

    /// Quote a personalized price and count an impression for the variant
    /// the player was shown, if any.
    pub fn price_for(
        &self,
        player_id: &str,
        product_id: &str,
        base_price: f64,
        now: DateTime<Utc>,
    ) -> MonetizationResult<PriceQuote> {
        let profile = self.profiles.get(player_id);
        let quote = self
            .pricing
            .quote_at(player_id, product_id, base_price, profile.as_ref(), now)?;
        if let Some(variant) = &quote.variant {
            self.log_outcome(
                self.experiments
                    .track_impression(&variant.experiment_id, player_id, now),
            );
        }
        metrics::counter!("engine.price_quotes").increment(1);
        Ok(quote)
    }

    /// Quote using the catalog's base price for `product_id`.
    pub fn price_catalog_product(
        &self,
        player_id: &str,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> MonetizationResult<PriceQuote> {
        let base = self
            .catalog
            .base_price(product_id)
            .ok_or_else(|| MonetizationError::InvalidPrice {
                product_id: product_id.to_string(),
                price: 0.0,
            })?;
        self.price_for(player_id, product_id, base, now)
    }

    // ─── Host-facing queries ────────────────────────────────────────────

    /// Segment changes since the last drain, oldest first.
    pub fn drain_segment_events(&self) -> Vec<SegmentChange> {
        self.events.drain()
    }

    pub fn dashboard(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let profiles = self.profiles.snapshot();
        self.analytics
            .dashboard(self.analytics.default_window(now), &profiles, now)
    }

    pub fn latest_dashboard(&self) -> Option<DashboardSnapshot> {
        self.analytics.latest()
    }

    pub fn start_experiment(&self, experiment_id: &str, now: DateTime<Utc>) -> MonetizationResult<()> {
        self.experiments.start(experiment_id, now)
    }

    // ─── Periodic work ──────────────────────────────────────────────────

    pub fn sweep_experiments(&self, now: DateTime<Utc>) -> Vec<ExperimentResult> {
        let completed = self.experiments.sweep(now);
        for result in &completed {
            info!(
                experiment_id = %result.experiment_id,
                winner = ?result.winner.as_ref().map(|w| &w.variant_name),
                "Experiment reached its end date"
            );
        }
        completed
    }

    /// Recompute churn for everyone and reward players who crossed the
    /// retention threshold.
    pub fn refresh_churn(&self, now: DateTime<Utc>) -> usize {
        let changes = self.profiles.refresh_churn(now);
        let mut rewarded = 0;
        for profile in self.profiles.snapshot() {
            if self
                .retention
                .consider(&profile.player_id, profile.segment, profile.churn_risk, now)
            {
                rewarded += 1;
            }
        }
        debug!(changes, rewarded, "Churn refresh finished");
        changes
    }

    pub fn evict_quotes(&self, now: DateTime<Utc>) -> usize {
        self.pricing.evict_expired(now)
    }

    /// Register the engine's periodic jobs on a scheduler.
    pub fn schedule(self: &Arc<Self>, scheduler: &Scheduler, start: DateTime<Utc>) {
        let intervals = &self.config.scheduler;
        let secs = |s: u64| Duration::seconds(s as i64);

        let engine = Arc::clone(self);
        scheduler.register("analytics", secs(intervals.aggregate_interval_secs), start, move |now| {
            engine.dashboard(now);
        });
        let engine = Arc::clone(self);
        scheduler.register(
            "experiment_sweep",
            secs(intervals.experiment_sweep_interval_secs),
            start,
            move |now| {
                engine.sweep_experiments(now);
            },
        );
        let engine = Arc::clone(self);
        scheduler.register(
            "quote_eviction",
            secs(intervals.quote_eviction_interval_secs),
            start,
            move |now| {
                engine.evict_quotes(now);
            },
        );
        let engine = Arc::clone(self);
        scheduler.register(
            "churn_refresh",
            secs(intervals.churn_refresh_interval_secs),
            start,
            move |now| {
                engine.refresh_churn(now);
            },
        );
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn experiments(&self) -> &Arc<ExperimentTracker> {
        &self.experiments
    }

    pub fn pricing(&self) -> &Arc<PricingComposer> {
        &self.pricing
    }

    pub fn ledger(&self) -> &Arc<RevenueLedger> {
        &self.ledger
    }

    fn record_conversion(
        &self,
        player_id: &str,
        product_id: &str,
        amount: f64,
        event_type: RevenueEventType,
        now: DateTime<Utc>,
    ) -> MonetizationResult<PlayerProfile> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MonetizationError::InvalidPrice {
                product_id: product_id.to_string(),
                price: amount,
            });
        }

        // Attributed to a variant only when the experiment counted it.
        let variant = self
            .experiments
            .claim(product_id, player_id, now)
            .and_then(|claim| {
                let outcome = self.experiments.track_conversion(
                    &claim.variant.experiment_id,
                    player_id,
                    amount,
                    now,
                );
                let counted = outcome != TrackOutcome::Ignored;
                self.log_outcome(outcome);
                counted.then_some(claim.variant)
            });

        let profile = self
            .profiles
            .record_purchase(player_id, amount, Some(product_id), now);
        self.ledger.record(
            RevenueEvent::new(player_id, event_type, amount, now)
                .with_product(product_id)
                .with_segment(profile.segment)
                .with_variant(variant),
        );
        self.pricing.invalidate_player(player_id);
        metrics::counter!("engine.conversions").increment(1);
        Ok(profile)
    }

    fn log_outcome(&self, outcome: TrackOutcome) {
        if let TrackOutcome::Completed(result) = outcome {
            info!(
                experiment_id = %result.experiment_id,
                reason = ?result.reason,
                confidence = ?result.confidence,
                winner = ?result.winner.as_ref().map(|w| &w.variant_name),
                "Experiment completed"
            );
        }
    }
}
