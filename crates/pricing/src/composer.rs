//! Price composition: experiment override, then multiplicative factors,
//! clamped to the configured band and cached per player and product.

use crate::factors::{self, RegionalTable};
use crate::quote::{AdjustmentKind, PriceAdjustment, PriceQuote};
use chrono::{DateTime, Duration, Utc};
use circuit_core::config::PricingConfig;
use circuit_core::{MonetizationError, MonetizationResult};
use circuit_experiments::ExperimentTracker;
use circuit_segmentation::PlayerProfile;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub struct PricingComposer {
    config: PricingConfig,
    regions: RegionalTable,
    experiments: Arc<ExperimentTracker>,
    /// Keyed by (player_id, product_id).
    cache: DashMap<(String, String), PriceQuote>,
}

impl PricingComposer {
    pub fn new(config: PricingConfig, experiments: Arc<ExperimentTracker>) -> Self {
        Self {
            regions: RegionalTable::new(&config.regional_multipliers),
            config,
            experiments,
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Lower and upper bounds on the combined factor.
    pub fn band(&self) -> (f64, f64) {
        (1.0 - self.config.max_adjustment, 1.0 + self.config.max_adjustment)
    }

    pub fn quote(
        &self,
        player_id: &str,
        product_id: &str,
        base_price: f64,
        profile: Option<&PlayerProfile>,
    ) -> MonetizationResult<PriceQuote> {
        self.quote_at(player_id, product_id, base_price, profile, Utc::now())
    }

    /// Serve the cached quote when it is still valid for this request,
    /// otherwise compose a fresh one.
    pub fn quote_at(
        &self,
        player_id: &str,
        product_id: &str,
        base_price: f64,
        profile: Option<&PlayerProfile>,
        now: DateTime<Utc>,
    ) -> MonetizationResult<PriceQuote> {
        if !base_price.is_finite() || base_price <= 0.0 {
            return Err(MonetizationError::InvalidPrice {
                product_id: product_id.to_string(),
                price: base_price,
            });
        }

        let key = (player_id.to_string(), product_id.to_string());
        let claim = self.experiments.claim(product_id, player_id, now);
        let segment = profile.map(|p| p.segment);

        if let Some(cached) = self.cache.get(&key) {
            let fresh = !cached.is_expired(now)
                && cached.original_price == base_price
                && cached.segment == segment
                && cached.variant == claim.as_ref().map(|c| c.variant.clone());
            if fresh {
                metrics::counter!("pricing.quote_cache_hits").increment(1);
                return Ok(cached.clone());
            }
        }

        let mut reasons = Vec::new();
        match &claim {
            Some(claim) => reasons.push(PriceAdjustment::new(
                AdjustmentKind::Experiment,
                claim.price_multiplier,
                format!(
                    "experiment {} variant {}",
                    claim.variant.experiment_id, claim.variant.variant_name
                ),
            )),
            None => {
                reasons.extend(
                    self.regions
                        .adjustment(profile.and_then(|p| p.region.as_deref())),
                );
                if let Some(profile) = profile {
                    reasons.extend(factors::segment_adjustment(&self.config, profile));
                    reasons.extend(factors::behavioral_adjustments(&self.config, profile));
                }
                reasons.extend(factors::time_adjustments(&self.config, now));
            }
        }
        // Configured multipliers of exactly 1.0 add nothing to the trail.
        reasons.retain(|r| r.multiplier != 1.0 || r.kind == AdjustmentKind::Regional);

        let raw_factor: f64 = reasons.iter().map(|r| r.multiplier).product();
        let (lo, hi) = self.band();
        let factor = raw_factor.clamp(lo, hi);

        let quote = PriceQuote {
            player_id: player_id.to_string(),
            product_id: product_id.to_string(),
            original_price: base_price,
            final_price: base_price * factor,
            factor,
            raw_factor,
            reasons,
            segment,
            variant: claim.map(|c| c.variant),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.quote_ttl_secs as i64),
        };

        debug!(
            player_id = %player_id,
            product_id = %product_id,
            base_price,
            final_price = quote.final_price,
            raw_factor,
            factor,
            "Composed price quote"
        );
        metrics::counter!("pricing.quotes_composed").increment(1);

        self.cache.insert(key, quote.clone());
        Ok(quote)
    }

    /// Drop every cached quote for a player, e.g. after a purchase.
    pub fn invalidate_player(&self, player_id: &str) -> usize {
        let before = self.cache.len();
        self.cache.retain(|(player, _), _| player != player_id);
        before - self.cache.len()
    }

    /// Remove expired quotes. Called periodically by the scheduler.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, quote| !quote.is_expired(now));
        before - self.cache.len()
    }

    pub fn cached_quotes(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use circuit_core::config::ExperimentsConfig;
    use circuit_core::PlayerSegment;
    use circuit_experiments::{Experiment, Variant};

    /// Wednesday mid-morning UTC, outside peak hours and the weekend.
    fn quiet_hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap()
    }

    fn composer(config: PricingConfig) -> PricingComposer {
        PricingComposer::new(
            config,
            Arc::new(ExperimentTracker::new(ExperimentsConfig::default())),
        )
    }

    fn profile(region: &str, segment: PlayerSegment) -> PlayerProfile {
        let mut profile = PlayerProfile::new("p1", quiet_hour());
        profile.region = Some(region.to_string());
        profile.segment = segment;
        profile
    }

    #[test]
    fn test_rejects_bad_base_price() {
        let c = composer(PricingConfig::default());
        for price in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = c.quote_at("p1", "gems", price, None, quiet_hour()).unwrap_err();
            assert!(matches!(err, MonetizationError::InvalidPrice { .. }));
        }
    }

    #[test]
    fn test_combined_factor_is_clamped() {
        let mut config = PricingConfig::default();
        config.regional_multipliers.insert("XX".into(), 2.0);
        let c = composer(config);

        let p = profile("XX", PlayerSegment::Casual);
        let quote = c.quote_at("p1", "gems", 10.0, Some(&p), quiet_hour()).unwrap();
        assert_eq!(quote.raw_factor, 2.0);
        assert_eq!(quote.factor, 1.5);
        assert_eq!(quote.final_price, 15.0);
        assert!(quote.was_clamped());
    }

    #[test]
    fn test_zero_adjustment_returns_base_price() {
        let config = PricingConfig {
            max_adjustment: 0.0,
            ..PricingConfig::default()
        };
        let c = composer(config);
        let p = profile("IN", PlayerSegment::Whale);
        let quote = c.quote_at("p1", "gems", 4.99, Some(&p), quiet_hour()).unwrap();
        assert_eq!(quote.final_price, 4.99);
    }

    #[test]
    fn test_unknown_region_prices_at_base() {
        let c = composer(PricingConfig::default());
        let p = profile("ZZ", PlayerSegment::Casual);
        let quote = c.quote_at("p1", "gems", 10.0, Some(&p), quiet_hour()).unwrap();
        assert_eq!(quote.factor, 1.0);
        assert_eq!(quote.final_price, 10.0);
        assert_eq!(quote.reason_summary(), "no regional data");
    }

    #[test]
    fn test_factors_multiply() {
        let c = composer(PricingConfig::default());
        let p = profile("US", PlayerSegment::Whale);
        let quote = c.quote_at("p1", "gems", 10.0, Some(&p), quiet_hour()).unwrap();
        assert!((quote.factor - 1.10).abs() < 1e-12);
        assert_eq!(quote.reasons.len(), 1);
        assert_eq!(quote.reasons[0].kind, AdjustmentKind::Segment);

        let p = profile("BR", PlayerSegment::NonSpender);
        let quote = c.quote_at("p2", "gems", 10.0, Some(&p), quiet_hour()).unwrap();
        assert!((quote.factor - 0.70 * 0.80).abs() < 1e-12);
    }

    #[test]
    fn test_missing_profile_uses_time_factors_only() {
        let c = composer(PricingConfig::default());
        // Saturday 2026-10-17, 19:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 19, 0, 0).unwrap();
        let quote = c.quote_at("p1", "gems", 10.0, None, now).unwrap();
        assert!((quote.factor - 1.05 * 0.95).abs() < 1e-12);
        assert!(quote.segment.is_none());
    }

    #[test]
    fn test_cache_until_expiry_or_price_change() {
        let c = composer(PricingConfig::default());
        let p = profile("US", PlayerSegment::Whale);
        let now = quiet_hour();

        let first = c.quote_at("p1", "gems", 10.0, Some(&p), now).unwrap();
        let cached = c
            .quote_at("p1", "gems", 10.0, Some(&p), now + Duration::minutes(5))
            .unwrap();
        assert_eq!(first.created_at, cached.created_at);

        let repriced = c
            .quote_at("p1", "gems", 12.0, Some(&p), now + Duration::minutes(6))
            .unwrap();
        assert_ne!(repriced.created_at, first.created_at);
        assert_eq!(repriced.original_price, 12.0);

        let later = now + Duration::seconds(3600 + 600);
        let recomputed = c.quote_at("p1", "gems", 12.0, Some(&p), later).unwrap();
        assert_eq!(recomputed.created_at, later);
    }

    #[test]
    fn test_segment_change_invalidates_cached_quote() {
        let c = composer(PricingConfig::default());
        let now = quiet_hour();
        let mut p = profile("US", PlayerSegment::Casual);
        let before = c.quote_at("p1", "gems", 10.0, Some(&p), now).unwrap();
        p.segment = PlayerSegment::Whale;
        let after = c.quote_at("p1", "gems", 10.0, Some(&p), now).unwrap();
        assert_eq!(before.factor, 1.0);
        assert!((after.factor - 1.10).abs() < 1e-12);
    }

    #[test]
    fn test_evict_expired() {
        let c = composer(PricingConfig::default());
        let now = quiet_hour();
        c.quote_at("p1", "gems", 10.0, None, now).unwrap();
        c.quote_at("p2", "gems", 10.0, None, now + Duration::minutes(30))
            .unwrap();
        assert_eq!(c.evict_expired(now + Duration::minutes(61)), 1);
        assert_eq!(c.cached_quotes(), 1);
        assert_eq!(c.invalidate_player("p2"), 1);
    }

    #[test]
    fn test_experiment_claim_is_exclusive() {
        let tracker = Arc::new(ExperimentTracker::new(ExperimentsConfig::default()));
        let now = quiet_hour();
        let exp = Experiment::new(
            "gem-price",
            "Gem price test",
            vec![Variant::new("a", 0.8), Variant::new("b", 0.8)],
            now + Duration::days(7),
        )
        .with_products(["gems"]);
        tracker.register(exp).unwrap();
        tracker.start("gem-price", now).unwrap();

        let c = PricingComposer::new(PricingConfig::default(), tracker);
        let p = profile("IN", PlayerSegment::Whale);
        let quote = c.quote_at("p1", "gems", 10.0, Some(&p), now).unwrap();
        assert_eq!(quote.factor, 0.8);
        assert_eq!(quote.reasons.len(), 1);
        assert_eq!(quote.reasons[0].kind, AdjustmentKind::Experiment);
        assert_eq!(quote.variant.as_ref().unwrap().experiment_id, "gem-price");

        // Products outside the experiment still get the factor pipeline.
        let other = c.quote_at("p1", "coins", 10.0, Some(&p), now).unwrap();
        assert!(other.variant.is_none());
        assert!((other.factor - 0.50 * 1.10).abs() < 1e-12);
    }
}
