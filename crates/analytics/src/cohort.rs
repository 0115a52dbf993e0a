//! Install-cohort retention over the profile population.

use chrono::{DateTime, Duration, Utc};
use circuit_segmentation::PlayerProfile;
use serde::{Deserialize, Serialize};

/// Standard day-N checkpoints reported on the dashboard.
pub const RETENTION_DAYS: [i64; 3] = [1, 7, 30];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPoint {
    pub day: i64,
    /// Players installed at least `day` days ago.
    pub eligible: u64,
    /// Eligible players seen again on or after day `day`.
    pub retained: u64,
    pub rate: f64,
}

pub fn retention(profiles: &[PlayerProfile], day: i64, now: DateTime<Utc>) -> RetentionPoint {
    let offset = Duration::days(day);
    let mut eligible = 0u64;
    let mut retained = 0u64;
    for profile in profiles {
        let checkpoint = profile.created_at + offset;
        if checkpoint > now {
            continue;
        }
        eligible += 1;
        if profile.last_seen >= checkpoint {
            retained += 1;
        }
    }
    RetentionPoint {
        day,
        eligible,
        retained,
        rate: if eligible == 0 {
            0.0
        } else {
            retained as f64 / eligible as f64
        },
    }
}

pub fn retention_curve(profiles: &[PlayerProfile], now: DateTime<Utc>) -> Vec<RetentionPoint> {
    RETENTION_DAYS
        .iter()
        .map(|day| retention(profiles, *day, now))
        .collect()
}
