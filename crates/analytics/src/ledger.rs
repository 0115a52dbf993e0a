//! Bounded revenue ledger. Oldest events are evicted first once the
//! configured capacity is reached.

use chrono::{DateTime, Utc};
use circuit_core::RevenueEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct RevenueLedger {
    events: Mutex<VecDeque<RevenueEvent>>,
    capacity: usize,
    recorded: AtomicU64,
    evicted: AtomicU64,
}

impl RevenueLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            recorded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn record(&self, event: RevenueEvent) {
        let mut evicted = 0u64;
        {
            let mut events = self.events.lock();
            events.push_back(event);
            while events.len() > self.capacity {
                events.pop_front();
                evicted += 1;
            }
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ledger.recorded").increment(1);
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
            metrics::counter!("ledger.evicted").increment(evicted);
            debug!(evicted, capacity = self.capacity, "Ledger at capacity, evicted oldest events");
        }
    }

    /// Copy of the retained events, oldest first. The lock is held only
    /// for the copy.
    pub fn snapshot(&self) -> Vec<RevenueEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events with `start <= timestamp < end`.
    pub fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<RevenueEvent> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of capacity in use.
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    pub fn total_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use circuit_core::RevenueEventType;
    use std::sync::Arc;

    fn event(player: &str, at: DateTime<Utc>) -> RevenueEvent {
        RevenueEvent::new(player, RevenueEventType::Purchase, 1.0, at)
    }

    #[test]
    fn test_fifo_eviction() {
        let ledger = RevenueLedger::new(3);
        let now = Utc::now();
        for i in 1..=4 {
            ledger.record(event(&format!("E{i}"), now));
        }
        let players: Vec<_> = ledger.snapshot().into_iter().map(|e| e.player_id).collect();
        assert_eq!(players, vec!["E2", "E3", "E4"]);
        assert_eq!(ledger.total_recorded(), 4);
        assert_eq!(ledger.total_evicted(), 1);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_events_between_is_half_open() {
        let ledger = RevenueLedger::new(10);
        let start = Utc::now();
        ledger.record(event("before", start - Duration::seconds(1)));
        ledger.record(event("at-start", start));
        ledger.record(event("inside", start + Duration::minutes(5)));
        ledger.record(event("at-end", start + Duration::hours(1)));

        let window = ledger.events_between(start, start + Duration::hours(1));
        let players: Vec<_> = window.into_iter().map(|e| e.player_id).collect();
        assert_eq!(players, vec!["at-start", "inside"]);
    }

    #[test]
    fn test_concurrent_writers_respect_capacity() {
        let ledger = Arc::new(RevenueLedger::new(100));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        ledger.record(event(&format!("t{t}-{i}"), Utc::now()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.len(), 100);
        assert_eq!(ledger.total_recorded(), 1000);
        assert_eq!(ledger.total_evicted(), 900);
        assert_eq!(ledger.fill_ratio(), 1.0);
    }
}
