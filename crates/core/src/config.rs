use crate::error::{MonetizationError, MonetizationResult};
use crate::types::PlayerSegment;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Root configuration. Loaded from an optional TOML file and environment
/// variables with the prefix `CIRCUIT_MONETIZATION__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub experiments: ExperimentsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ─── Segmentation ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_whale_spending_threshold")]
    pub whale_spending_threshold: f64,
    #[serde(default = "default_dolphin_spending_threshold")]
    pub dolphin_spending_threshold: f64,
    #[serde(default = "default_new_player_sessions")]
    pub new_player_sessions: u32,
    #[serde(default = "default_competitive_ranked_games")]
    pub competitive_ranked_games: f64,
    #[serde(default = "default_social_friends_invited")]
    pub social_friends_invited: f64,
    #[serde(default = "default_casual_session_minutes")]
    pub casual_session_minutes: f64,
    #[serde(default = "default_at_risk_churn_threshold")]
    pub at_risk_churn_threshold: f64,
    /// Days without a session after which inactivity saturates the churn score.
    #[serde(default = "default_churn_inactive_days")]
    pub churn_inactive_days: f64,
    /// Reported sessions longer than this are treated as 0 minutes.
    #[serde(default = "default_max_session_minutes")]
    pub max_session_minutes: f64,
}

fn default_whale_spending_threshold() -> f64 {
    200.0
}
fn default_dolphin_spending_threshold() -> f64 {
    50.0
}
fn default_new_player_sessions() -> u32 {
    3
}
fn default_competitive_ranked_games() -> f64 {
    20.0
}
fn default_social_friends_invited() -> f64 {
    3.0
}
fn default_casual_session_minutes() -> f64 {
    10.0
}
fn default_at_risk_churn_threshold() -> f64 {
    0.7
}
fn default_churn_inactive_days() -> f64 {
    7.0
}
fn default_max_session_minutes() -> f64 {
    720.0
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            whale_spending_threshold: default_whale_spending_threshold(),
            dolphin_spending_threshold: default_dolphin_spending_threshold(),
            new_player_sessions: default_new_player_sessions(),
            competitive_ranked_games: default_competitive_ranked_games(),
            social_friends_invited: default_social_friends_invited(),
            casual_session_minutes: default_casual_session_minutes(),
            at_risk_churn_threshold: default_at_risk_churn_threshold(),
            churn_inactive_days: default_churn_inactive_days(),
            max_session_minutes: default_max_session_minutes(),
        }
    }
}

// ─── Pricing ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// Half-width of the allowed factor band: factors are clamped to
    /// `[1 - max_adjustment, 1 + max_adjustment]`.
    #[serde(default = "default_max_adjustment")]
    pub max_adjustment: f64,
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,
    /// Purchasing-power multipliers keyed by ISO country code.
    #[serde(default = "default_regional_multipliers")]
    pub regional_multipliers: HashMap<String, f64>,
    #[serde(default = "default_segment_multipliers")]
    pub segment_multipliers: HashMap<PlayerSegment, f64>,
    #[serde(default = "default_engaged_session_minutes")]
    pub engaged_session_minutes: f64,
    #[serde(default = "default_engaged_multiplier")]
    pub engaged_multiplier: f64,
    #[serde(default = "default_churn_discount_threshold")]
    pub churn_discount_threshold: f64,
    #[serde(default = "default_churn_discount_multiplier")]
    pub churn_discount_multiplier: f64,
    /// Inclusive start hour (UTC) of the evening peak.
    #[serde(default = "default_peak_start_hour")]
    pub peak_start_hour: u32,
    /// Exclusive end hour (UTC) of the evening peak.
    #[serde(default = "default_peak_end_hour")]
    pub peak_end_hour: u32,
    #[serde(default = "default_peak_multiplier")]
    pub peak_multiplier: f64,
    #[serde(default = "default_weekend_multiplier")]
    pub weekend_multiplier: f64,
}

fn default_max_adjustment() -> f64 {
    0.5
}
fn default_quote_ttl_secs() -> u64 {
    3600
}
fn default_regional_multipliers() -> HashMap<String, f64> {
    [
        ("US", 1.0),
        ("CA", 1.0),
        ("GB", 1.0),
        ("DE", 1.0),
        ("FR", 1.0),
        ("AU", 1.0),
        ("JP", 1.05),
        ("CH", 1.10),
        ("NO", 1.10),
        ("KR", 0.95),
        ("BR", 0.70),
        ("MX", 0.75),
        ("RU", 0.65),
        ("TR", 0.60),
        ("ID", 0.60),
        ("PH", 0.60),
        ("IN", 0.50),
    ]
    .into_iter()
    .map(|(code, multiplier)| (code.to_string(), multiplier))
    .collect()
}
fn default_segment_multipliers() -> HashMap<PlayerSegment, f64> {
    HashMap::from([
        (PlayerSegment::Whale, 1.10),
        (PlayerSegment::LowSpender, 0.90),
        (PlayerSegment::NonSpender, 0.80),
        (PlayerSegment::AtRisk, 0.85),
    ])
}
fn default_engaged_session_minutes() -> f64 {
    30.0
}
fn default_engaged_multiplier() -> f64 {
    1.05
}
fn default_churn_discount_threshold() -> f64 {
    0.6
}
fn default_churn_discount_multiplier() -> f64 {
    0.85
}
fn default_peak_start_hour() -> u32 {
    18
}
fn default_peak_end_hour() -> u32 {
    22
}
fn default_peak_multiplier() -> f64 {
    1.05
}
fn default_weekend_multiplier() -> f64 {
    0.95
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            max_adjustment: default_max_adjustment(),
            quote_ttl_secs: default_quote_ttl_secs(),
            regional_multipliers: default_regional_multipliers(),
            segment_multipliers: default_segment_multipliers(),
            engaged_session_minutes: default_engaged_session_minutes(),
            engaged_multiplier: default_engaged_multiplier(),
            churn_discount_threshold: default_churn_discount_threshold(),
            churn_discount_multiplier: default_churn_discount_multiplier(),
            peak_start_hour: default_peak_start_hour(),
            peak_end_hour: default_peak_end_hour(),
            peak_multiplier: default_peak_multiplier(),
            weekend_multiplier: default_weekend_multiplier(),
        }
    }
}

// ─── Experiments ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    #[serde(default = "default_promotion_confidence")]
    pub promotion_confidence: f64,
    #[serde(default = "default_min_impressions_per_variant")]
    pub min_impressions_per_variant: u64,
}

fn default_promotion_confidence() -> f64 {
    0.95
}
fn default_min_impressions_per_variant() -> u64 {
    30
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            promotion_confidence: default_promotion_confidence(),
            min_impressions_per_variant: default_min_impressions_per_variant(),
        }
    }
}

// ─── Ledger ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_capacity")]
    pub capacity: usize,
}

fn default_ledger_capacity() -> usize {
    10_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: default_ledger_capacity(),
        }
    }
}

// ─── Analytics ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_low_conversion_alert")]
    pub low_conversion_alert: f64,
    #[serde(default = "default_high_churn_share_alert")]
    pub high_churn_share_alert: f64,
    #[serde(default = "default_ledger_saturation_alert")]
    pub ledger_saturation_alert: f64,
}

fn default_window_hours() -> i64 {
    24
}
fn default_low_conversion_alert() -> f64 {
    0.02
}
fn default_high_churn_share_alert() -> f64 {
    0.25
}
fn default_ledger_saturation_alert() -> f64 {
    0.9
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            low_conversion_alert: default_low_conversion_alert(),
            high_churn_share_alert: default_high_churn_share_alert(),
            ledger_saturation_alert: default_ledger_saturation_alert(),
        }
    }
}

// ─── Retention ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,
    #[serde(default = "default_churn_reward_threshold")]
    pub churn_reward_threshold: f64,
    #[serde(default = "default_comeback_currency")]
    pub comeback_currency: u64,
    #[serde(default = "default_refill_energy")]
    pub refill_energy: bool,
    #[serde(default = "default_premium_hours")]
    pub premium_hours: i64,
    #[serde(default = "default_reward_cooldown_hours")]
    pub cooldown_hours: i64,
}

fn default_retention_enabled() -> bool {
    true
}
fn default_churn_reward_threshold() -> f64 {
    0.7
}
fn default_comeback_currency() -> u64 {
    100
}
fn default_refill_energy() -> bool {
    true
}
fn default_premium_hours() -> i64 {
    24
}
fn default_reward_cooldown_hours() -> i64 {
    72
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            churn_reward_threshold: default_churn_reward_threshold(),
            comeback_currency: default_comeback_currency(),
            refill_energy: default_refill_energy(),
            premium_hours: default_premium_hours(),
            cooldown_hours: default_reward_cooldown_hours(),
        }
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_aggregate_interval_secs")]
    pub aggregate_interval_secs: u64,
    #[serde(default = "default_experiment_sweep_interval_secs")]
    pub experiment_sweep_interval_secs: u64,
    #[serde(default = "default_quote_eviction_interval_secs")]
    pub quote_eviction_interval_secs: u64,
    #[serde(default = "default_churn_refresh_interval_secs")]
    pub churn_refresh_interval_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_aggregate_interval_secs() -> u64 {
    60
}
fn default_experiment_sweep_interval_secs() -> u64 {
    30
}
fn default_quote_eviction_interval_secs() -> u64 {
    300
}
fn default_churn_refresh_interval_secs() -> u64 {
    600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            aggregate_interval_secs: default_aggregate_interval_secs(),
            experiment_sweep_interval_secs: default_experiment_sweep_interval_secs(),
            quote_eviction_interval_secs: default_quote_eviction_interval_secs(),
            churn_refresh_interval_secs: default_churn_refresh_interval_secs(),
        }
    }
}

// ─── Metrics ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file overlaid with
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CIRCUIT_MONETIZATION")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject out-of-range values. Called once at startup.
    pub fn validate(&self) -> MonetizationResult<()> {
        let pricing = &self.pricing;
        if !(0.0..1.0).contains(&pricing.max_adjustment) {
            return Err(MonetizationError::Config(format!(
                "pricing.max_adjustment must be within [0, 1), got {}",
                pricing.max_adjustment
            )));
        }
        if pricing.quote_ttl_secs == 0 {
            return Err(MonetizationError::Config(
                "pricing.quote_ttl_secs must be positive".into(),
            ));
        }
        let multipliers = pricing
            .regional_multipliers
            .values()
            .chain(pricing.segment_multipliers.values())
            .chain([
                &pricing.engaged_multiplier,
                &pricing.churn_discount_multiplier,
                &pricing.peak_multiplier,
                &pricing.weekend_multiplier,
            ]);
        for multiplier in multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(MonetizationError::Config(format!(
                    "pricing multipliers must be positive, got {multiplier}"
                )));
            }
        }
        if pricing.peak_start_hour > 23 || pricing.peak_end_hour > 24 {
            return Err(MonetizationError::Config(
                "pricing peak hours must fall within a day".into(),
            ));
        }

        let seg = &self.segmentation;
        if !seg.max_session_minutes.is_finite() || seg.max_session_minutes <= 0.0 {
            return Err(MonetizationError::Config(format!(
                "segmentation.max_session_minutes must be positive, got {}",
                seg.max_session_minutes
            )));
        }
        if seg.dolphin_spending_threshold >= seg.whale_spending_threshold {
            return Err(MonetizationError::Config(format!(
                "segmentation.dolphin_spending_threshold ({}) must be below whale_spending_threshold ({})",
                seg.dolphin_spending_threshold, seg.whale_spending_threshold
            )));
        }
        if !(0.0..=1.0).contains(&seg.at_risk_churn_threshold) {
            return Err(MonetizationError::Config(
                "segmentation.at_risk_churn_threshold must be within [0, 1]".into(),
            ));
        }
        if seg.churn_inactive_days <= 0.0 {
            return Err(MonetizationError::Config(
                "segmentation.churn_inactive_days must be positive".into(),
            ));
        }

        if !(0.5..=1.0).contains(&self.experiments.promotion_confidence) {
            return Err(MonetizationError::Config(
                "experiments.promotion_confidence must be within [0.5, 1]".into(),
            ));
        }
        if self.ledger.capacity == 0 {
            return Err(MonetizationError::Config(
                "ledger.capacity must be positive".into(),
            ));
        }
        if self.analytics.window_hours <= 0 {
            return Err(MonetizationError::Config(
                "analytics.window_hours must be positive".into(),
            ));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(MonetizationError::Config(
                "scheduler.tick_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.capacity, 10_000);
        assert_eq!(config.pricing.quote_ttl_secs, 3600);
        assert_eq!(config.segmentation.whale_spending_threshold, 200.0);
        assert_eq!(
            config.pricing.segment_multipliers.get(&PlayerSegment::Whale),
            Some(&1.10)
        );
    }

    #[test]
    fn test_rejects_out_of_band_adjustment() {
        let mut config = AppConfig::default();
        config.pricing.max_adjustment = 1.0;
        assert!(config.validate().is_err());

        config.pricing.max_adjustment = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_session_cap() {
        let mut config = AppConfig::default();
        assert_eq!(config.segmentation.max_session_minutes, 720.0);
        config.segmentation.max_session_minutes = f64::INFINITY;
        assert!(config.validate().is_err());
        config.segmentation.max_session_minutes = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_spending_thresholds() {
        let mut config = AppConfig::default();
        config.segmentation.dolphin_spending_threshold = 250.0;
        assert!(matches!(
            config.validate(),
            Err(MonetizationError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_ledger_capacity() {
        let mut config = AppConfig::default();
        config.ledger.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_section() {
        let config: AppConfig =
            serde_json::from_str(r#"{"pricing": {"max_adjustment": 0.25}}"#).unwrap();
        assert_eq!(config.pricing.max_adjustment, 0.25);
        assert_eq!(config.pricing.quote_ttl_secs, 3600);
        assert_eq!(config.ledger.capacity, 10_000);
    }
}
