//! Churn-risk scoring from session recency, frequency and spend.

use crate::profile::PlayerProfile;
use chrono::{DateTime, Duration, Utc};

const INACTIVITY_WEIGHT: f64 = 0.5;
const FREQUENCY_WEIGHT: f64 = 0.2;
const SHORT_SESSION_WEIGHT: f64 = 0.15;
const NO_PURCHASE_WEIGHT: f64 = 0.15;

/// Sessions per week at which the frequency term reaches zero.
const HEALTHY_WEEKLY_SESSIONS: f64 = 7.0;
/// Average session length at which the short-session term reaches zero.
const HEALTHY_SESSION_MINUTES: f64 = 15.0;

#[derive(Debug, Clone, Copy)]
pub struct ChurnModel {
    inactive_days: f64,
}

impl ChurnModel {
    pub fn new(inactive_days: f64) -> Self {
        Self {
            inactive_days: inactive_days.max(f64::EPSILON),
        }
    }

    /// Churn risk in `[0, 1]`.
    pub fn score(&self, profile: &PlayerProfile, now: DateTime<Utc>) -> f64 {
        let idle_days = (now - profile.last_seen).num_seconds().max(0) as f64 / 86_400.0;
        let inactivity = (idle_days / self.inactive_days).min(1.0);

        let week_ago = now - Duration::days(7);
        let recent = profile
            .session_starts
            .iter()
            .filter(|at| **at >= week_ago)
            .count() as f64;
        let infrequency = (1.0 - recent / HEALTHY_WEEKLY_SESSIONS).clamp(0.0, 1.0);

        let short_sessions = if profile.session_count == 0 {
            0.0
        } else {
            (1.0 - profile.average_session_minutes / HEALTHY_SESSION_MINUTES).clamp(0.0, 1.0)
        };

        let no_purchase = if profile.purchase_count == 0 { 1.0 } else { 0.0 };

        let risk = INACTIVITY_WEIGHT * inactivity
            + FREQUENCY_WEIGHT * infrequency
            + SHORT_SESSION_WEIGHT * short_sessions
            + NO_PURCHASE_WEIGHT * no_purchase;
        risk.clamp(0.0, 1.0)
    }
}

impl Default for ChurnModel {
    fn default() -> Self {
        Self::new(7.0)
    }
}
