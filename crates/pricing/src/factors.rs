//! Independent price factors. Each returns the adjustments it contributes;
//! an empty list means a factor of 1.0.

use crate::quote::{AdjustmentKind, PriceAdjustment};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use circuit_core::config::PricingConfig;
use circuit_segmentation::PlayerProfile;
use std::collections::HashMap;

pub const NO_REGIONAL_DATA: &str = "no regional data";

/// Purchasing-power lookup keyed by upper-case ISO country code.
#[derive(Debug, Clone)]
pub struct RegionalTable {
    multipliers: HashMap<String, f64>,
}

impl RegionalTable {
    pub fn new(multipliers: &HashMap<String, f64>) -> Self {
        Self {
            multipliers: multipliers
                .iter()
                .map(|(code, m)| (code.trim().to_ascii_uppercase(), *m))
                .collect(),
        }
    }

    /// Unknown or missing regions price at 1.0 and say so; known regions
    /// at exactly 1.0 contribute nothing.
    pub fn adjustment(&self, region: Option<&str>) -> Option<PriceAdjustment> {
        let code = region.map(|r| r.trim().to_ascii_uppercase());
        match code.as_deref().and_then(|c| self.multipliers.get(c).map(|m| (c, *m))) {
            Some((_, multiplier)) if multiplier == 1.0 => None,
            Some((code, multiplier)) => Some(PriceAdjustment::new(
                AdjustmentKind::Regional,
                multiplier,
                format!("regional pricing for {code} (x{multiplier:.2})"),
            )),
            None => Some(PriceAdjustment::new(
                AdjustmentKind::Regional,
                1.0,
                NO_REGIONAL_DATA,
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }
}

pub fn segment_adjustment(config: &PricingConfig, profile: &PlayerProfile) -> Option<PriceAdjustment> {
    let multiplier = *config.segment_multipliers.get(&profile.segment)?;
    Some(PriceAdjustment::new(
        AdjustmentKind::Segment,
        multiplier,
        format!("{} segment pricing (x{multiplier:.2})", profile.segment),
    ))
}

pub fn behavioral_adjustments(config: &PricingConfig, profile: &PlayerProfile) -> Vec<PriceAdjustment> {
    let mut adjustments = Vec::new();
    if profile.churn_risk >= config.churn_discount_threshold {
        adjustments.push(PriceAdjustment::new(
            AdjustmentKind::Behavioral,
            config.churn_discount_multiplier,
            format!("retention discount, churn risk {:.2}", profile.churn_risk),
        ));
    }
    if profile.session_count > 0 && profile.average_session_minutes >= config.engaged_session_minutes {
        adjustments.push(PriceAdjustment::new(
            AdjustmentKind::Behavioral,
            config.engaged_multiplier,
            format!(
                "highly engaged, {:.0} min average session",
                profile.average_session_minutes
            ),
        ));
    }
    adjustments
}

pub fn time_adjustments(config: &PricingConfig, now: DateTime<Utc>) -> Vec<PriceAdjustment> {
    let mut adjustments = Vec::new();
    let hour = now.hour();
    if (config.peak_start_hour..config.peak_end_hour).contains(&hour) {
        adjustments.push(PriceAdjustment::new(
            AdjustmentKind::TimeOfDay,
            config.peak_multiplier,
            format!("peak hours ({:02}:00 UTC)", hour),
        ));
    }
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        adjustments.push(PriceAdjustment::new(
            AdjustmentKind::TimeOfDay,
            config.weekend_multiplier,
            "weekend pricing",
        ));
    }
    adjustments
}
