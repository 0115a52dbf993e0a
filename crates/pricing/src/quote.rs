use chrono::{DateTime, Utc};
use circuit_core::{PlayerSegment, VariantRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Experiment,
    Regional,
    Segment,
    Behavioral,
    TimeOfDay,
}

/// One contributing factor in a quote's reason trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAdjustment {
    pub kind: AdjustmentKind,
    pub multiplier: f64,
    pub reason: String,
}

impl PriceAdjustment {
    pub fn new(kind: AdjustmentKind, multiplier: f64, reason: impl Into<String>) -> Self {
        Self {
            kind,
            multiplier,
            reason: reason.into(),
        }
    }
}

/// A personalized price. `final_price == original_price * factor`, where
/// `factor` is `raw_factor` clamped to the configured band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub player_id: String,
    pub product_id: String,
    pub original_price: f64,
    pub final_price: f64,
    pub factor: f64,
    pub raw_factor: f64,
    pub reasons: Vec<PriceAdjustment>,
    pub segment: Option<PlayerSegment>,
    pub variant: Option<VariantRef>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn was_clamped(&self) -> bool {
        self.factor != self.raw_factor
    }

    /// Reasons joined for display, e.g. in a store tooltip.
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.reason.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
