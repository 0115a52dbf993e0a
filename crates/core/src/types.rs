use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Categorical label classifying a player by spending and behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerSegment {
    /// No rule qualified the player.
    Unknown,
    /// Assigned at profile creation, before the first classification.
    #[default]
    NewPlayer,
    NonSpender,
    LowSpender,
    Dolphin,
    Whale,
    Competitive,
    Social,
    Casual,
    AtRisk,
}

impl PlayerSegment {
    pub const ALL: [PlayerSegment; 10] = [
        Self::Unknown,
        Self::NewPlayer,
        Self::NonSpender,
        Self::LowSpender,
        Self::Dolphin,
        Self::Whale,
        Self::Competitive,
        Self::Social,
        Self::Casual,
        Self::AtRisk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::NewPlayer => "new_player",
            Self::NonSpender => "non_spender",
            Self::LowSpender => "low_spender",
            Self::Dolphin => "dolphin",
            Self::Whale => "whale",
            Self::Competitive => "competitive",
            Self::Social => "social",
            Self::Casual => "casual",
            Self::AtRisk => "at_risk",
        }
    }
}

impl std::fmt::Display for PlayerSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted when reclassification moves a player to a different segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChange {
    pub player_id: String,
    pub previous: PlayerSegment,
    pub current: PlayerSegment,
    pub confidence: f64,
    pub changed_at: DateTime<Utc>,
}

/// Identifies the experiment arm a quote or event was served under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantRef {
    pub experiment_id: String,
    pub variant_index: usize,
    pub variant_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueEventType {
    Purchase,
    AdImpression,
    AdCompleted,
    OfferShown,
    OfferAccepted,
    SessionStart,
    SessionEnd,
    RetentionReward,
}

impl RevenueEventType {
    /// Whether events of this type carry real revenue.
    pub fn is_monetary(self) -> bool {
        matches!(self, Self::Purchase | Self::AdCompleted | Self::OfferAccepted)
    }
}

/// Append-only record consumed by the analytics aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueEvent {
    pub event_id: Uuid,
    pub player_id: String,
    pub event_type: RevenueEventType,
    pub timestamp: DateTime<Utc>,
    pub revenue: f64,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub segment: Option<PlayerSegment>,
    #[serde(default)]
    pub variant: Option<VariantRef>,
}

impl RevenueEvent {
    pub fn new(
        player_id: impl Into<String>,
        event_type: RevenueEventType,
        revenue: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            player_id: player_id.into(),
            event_type,
            timestamp,
            revenue,
            product_id: None,
            segment: None,
            variant: None,
        }
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_segment(mut self, segment: PlayerSegment) -> Self {
        self.segment = Some(segment);
        self
    }

    pub fn with_variant(mut self, variant: Option<VariantRef>) -> Self {
        self.variant = variant;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_serde_names() {
        let json = serde_json::to_string(&PlayerSegment::AtRisk).unwrap();
        assert_eq!(json, "\"at_risk\"");
        let parsed: PlayerSegment = serde_json::from_str("\"whale\"").unwrap();
        assert_eq!(parsed, PlayerSegment::Whale);
        assert_eq!(PlayerSegment::LowSpender.to_string(), "low_spender");
    }

    #[test]
    fn test_default_segment_is_new_player() {
        assert_eq!(PlayerSegment::default(), PlayerSegment::NewPlayer);
    }

    #[test]
    fn test_revenue_event_builder() {
        let event = RevenueEvent::new("p1", RevenueEventType::Purchase, 4.99, Utc::now())
            .with_product("gems_small")
            .with_segment(PlayerSegment::Whale);
        assert_eq!(event.product_id.as_deref(), Some("gems_small"));
        assert_eq!(event.segment, Some(PlayerSegment::Whale));
        assert!(event.event_type.is_monetary());
        assert!(!RevenueEventType::SessionStart.is_monetary());
    }
}
