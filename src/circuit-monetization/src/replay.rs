//! Offline replay of newline-delimited game events.

use chrono::{DateTime, Utc};
use circuit_core::MonetizationResult;
use circuit_engine::MonetizationEngine;
use serde::Deserialize;
use std::io::BufRead;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Session {
        player_id: String,
        started_at: DateTime<Utc>,
        minutes: f64,
    },
    Purchase {
        player_id: String,
        product_id: String,
        amount: f64,
        at: DateTime<Utc>,
    },
    Ad {
        player_id: String,
        placement: String,
        #[serde(default)]
        revenue: f64,
        #[serde(default = "default_completed")]
        completed: bool,
        at: DateTime<Utc>,
    },
    OfferShown {
        player_id: String,
        offer_id: String,
        at: DateTime<Utc>,
    },
    PriceRequest {
        player_id: String,
        product_id: String,
        /// Falls back to the catalog price when absent.
        #[serde(default)]
        base_price: Option<f64>,
        at: DateTime<Utc>,
    },
}

fn default_completed() -> bool {
    true
}

impl GameEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            GameEvent::Session { started_at, .. } => *started_at,
            GameEvent::Purchase { at, .. }
            | GameEvent::Ad { at, .. }
            | GameEvent::OfferShown { at, .. }
            | GameEvent::PriceRequest { at, .. } => *at,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplaySummary {
    pub applied: u64,
    pub rejected: u64,
    pub last_timestamp: Option<DateTime<Utc>>,
}

pub fn apply(engine: &MonetizationEngine, event: &GameEvent) -> MonetizationResult<()> {
    match event {
        GameEvent::Session {
            player_id,
            started_at,
            minutes,
        } => {
            engine.on_session(player_id, *started_at, *minutes);
        }
        GameEvent::Purchase {
            player_id,
            product_id,
            amount,
            at,
        } => {
            engine.on_purchase(player_id, product_id, *amount, *at)?;
        }
        GameEvent::Ad {
            player_id,
            placement,
            revenue,
            completed,
            at,
        } => engine.on_ad_result(player_id, placement, *revenue, *completed, *at),
        GameEvent::OfferShown {
            player_id,
            offer_id,
            at,
        } => engine.on_offer_shown(player_id, offer_id, *at),
        GameEvent::PriceRequest {
            player_id,
            product_id,
            base_price,
            at,
        } => {
            let quote = match base_price {
                Some(base) => engine.price_for(player_id, product_id, *base, *at)?,
                None => engine.price_catalog_product(player_id, product_id, *at)?,
            };
            debug!(
                player_id = %player_id,
                product_id = %product_id,
                final_price = quote.final_price,
                reasons = %quote.reason_summary(),
                "Price served"
            );
        }
    }
    Ok(())
}

/// Feed every line through the engine. Malformed lines and rejected events
/// are logged and skipped.
pub fn run<R: BufRead>(engine: &MonetizationEngine, reader: R) -> std::io::Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: GameEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed event");
                summary.rejected += 1;
                continue;
            }
        };
        match apply(engine, &event) {
            Ok(()) => {
                summary.applied += 1;
                let ts = event.timestamp();
                summary.last_timestamp = Some(summary.last_timestamp.map_or(ts, |t| t.max(ts)));
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "Event rejected");
                summary.rejected += 1;
            }
        }
    }
    Ok(summary)
}
