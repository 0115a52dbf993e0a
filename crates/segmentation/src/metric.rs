//! Closed set of profile metrics that rules may reference.

use crate::profile::PlayerProfile;
use chrono::{DateTime, Utc};
use circuit_core::{MonetizationError, MonetizationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A metric a rule criterion reads from a profile.
///
/// Catalog files name metrics as strings. Builtin names map to their
/// variant; anything else refers to a host-defined numeric attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricId {
    LifetimeValue,
    PurchaseCount,
    SessionCount,
    AverageSessionMinutes,
    TotalPlayMinutes,
    DaysSinceLastSession,
    DaysSinceLastPurchase,
    DaysSinceInstall,
    AdsWatched,
    ChurnRisk,
    Region,
    Tags,
    Attribute(String),
}

impl MetricId {
    pub fn name(&self) -> &str {
        match self {
            Self::LifetimeValue => "lifetime_value",
            Self::PurchaseCount => "purchase_count",
            Self::SessionCount => "session_count",
            Self::AverageSessionMinutes => "average_session_minutes",
            Self::TotalPlayMinutes => "total_play_minutes",
            Self::DaysSinceLastSession => "days_since_last_session",
            Self::DaysSinceLastPurchase => "days_since_last_purchase",
            Self::DaysSinceInstall => "days_since_install",
            Self::AdsWatched => "ads_watched",
            Self::ChurnRisk => "churn_risk",
            Self::Region => "region",
            Self::Tags => "tags",
            Self::Attribute(name) => name,
        }
    }

    /// Metrics whose value moves with the clock rather than with mutations.
    pub fn is_time_dependent(&self) -> bool {
        matches!(
            self,
            Self::DaysSinceLastSession | Self::DaysSinceLastPurchase | Self::DaysSinceInstall
        )
    }
}

impl From<String> for MetricId {
    fn from(name: String) -> Self {
        match normalize(&name).as_str() {
            "lifetime_value" | "total_spent" => Self::LifetimeValue,
            "purchase_count" => Self::PurchaseCount,
            "session_count" => Self::SessionCount,
            "average_session_minutes" | "average_session_length" => Self::AverageSessionMinutes,
            "total_play_minutes" => Self::TotalPlayMinutes,
            "days_since_last_session" => Self::DaysSinceLastSession,
            "days_since_last_purchase" => Self::DaysSinceLastPurchase,
            "days_since_install" => Self::DaysSinceInstall,
            "ads_watched" => Self::AdsWatched,
            "churn_risk" => Self::ChurnRisk,
            "region" => Self::Region,
            "tags" => Self::Tags,
            other => Self::Attribute(other.to_string()),
        }
    }
}

impl From<&str> for MetricId {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<MetricId> for String {
    fn from(metric: MetricId) -> Self {
        metric.name().to_string()
    }
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `rankedGamesPlayed` and `ranked_games_played` name the same metric.
pub(crate) fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Value of a metric borrowed from a profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue<'a> {
    Number(f64),
    Text(&'a str),
    Tags(&'a BTreeSet<String>),
}

impl MetricValue<'_> {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// Read `metric` from `profile`. Builtins always resolve; an attribute the
/// profile has never recorded yields [`MonetizationError::UnknownMetric`].
pub fn extract<'a>(
    profile: &'a PlayerProfile,
    metric: &MetricId,
    now: DateTime<Utc>,
) -> MonetizationResult<MetricValue<'a>> {
    let value = match metric {
        MetricId::LifetimeValue => MetricValue::Number(profile.lifetime_value),
        MetricId::PurchaseCount => MetricValue::Number(profile.purchase_count as f64),
        MetricId::SessionCount => MetricValue::Number(profile.session_count as f64),
        MetricId::AverageSessionMinutes => MetricValue::Number(profile.average_session_minutes),
        MetricId::TotalPlayMinutes => MetricValue::Number(profile.total_play_minutes),
        MetricId::DaysSinceLastSession => MetricValue::Number(whole_days(profile.last_seen, now)),
        MetricId::DaysSinceLastPurchase => MetricValue::Number(
            profile
                .last_purchase_at
                .map(|at| whole_days(at, now))
                .unwrap_or(f64::INFINITY),
        ),
        MetricId::DaysSinceInstall => MetricValue::Number(whole_days(profile.created_at, now)),
        MetricId::AdsWatched => MetricValue::Number(profile.ads_watched as f64),
        MetricId::ChurnRisk => MetricValue::Number(profile.churn_risk),
        MetricId::Region => MetricValue::Text(profile.region.as_deref().unwrap_or("")),
        MetricId::Tags => MetricValue::Tags(&profile.tags),
        MetricId::Attribute(name) => match profile.attributes.get(name) {
            Some(v) => MetricValue::Number(*v),
            None => return Err(MonetizationError::UnknownMetric(name.clone())),
        },
    };
    Ok(value)
}

/// Whole days elapsed, so repeated evaluation within a day is stable.
fn whole_days(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_days().max(0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_builtin_and_camel_case_names() {
        assert_eq!(MetricId::from("lifetime_value"), MetricId::LifetimeValue);
        assert_eq!(MetricId::from("lifetimeValue"), MetricId::LifetimeValue);
        assert_eq!(MetricId::from("churnRisk"), MetricId::ChurnRisk);
        assert_eq!(
            MetricId::from("rankedGamesPlayed"),
            MetricId::Attribute("ranked_games_played".into())
        );
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&MetricId::SessionCount).unwrap();
        assert_eq!(json, "\"session_count\"");
        let parsed: MetricId = serde_json::from_str("\"friendsInvited\"").unwrap();
        assert_eq!(parsed, MetricId::Attribute("friends_invited".into()));
    }

    #[test]
    fn test_extract_unknown_attribute() {
        let now = Utc::now();
        let profile = PlayerProfile::new("p1", now);
        let err = extract(&profile, &MetricId::Attribute("guild_rank".into()), now).unwrap_err();
        assert!(matches!(err, MonetizationError::UnknownMetric(name) if name == "guild_rank"));
    }

    #[test]
    fn test_extract_days_since_last_session() {
        let now = Utc::now();
        let mut profile = PlayerProfile::new("p1", now - Duration::days(10));
        profile.last_seen = now - Duration::hours(50);
        let value = extract(&profile, &MetricId::DaysSinceLastSession, now).unwrap();
        assert_eq!(value, MetricValue::Number(2.0));

        let install = extract(&profile, &MetricId::DaysSinceInstall, now).unwrap();
        assert_eq!(install, MetricValue::Number(10.0));
    }

    #[test]
    fn test_extract_never_purchased_is_infinite() {
        let now = Utc::now();
        let profile = PlayerProfile::new("p1", now);
        let value = extract(&profile, &MetricId::DaysSinceLastPurchase, now).unwrap();
        assert_eq!(value.as_number(), Some(f64::INFINITY));
    }
}
