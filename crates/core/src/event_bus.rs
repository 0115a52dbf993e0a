//! Segment-change propagation.
//!
//! Reclassification publishes a [`SegmentChange`] here. Observers registered
//! with [`SegmentEventQueue::subscribe`] are invoked synchronously in
//! subscription order; the change is then appended to a FIFO queue that the
//! host drains with [`SegmentEventQueue::drain`].

use crate::types::SegmentChange;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;

/// Synchronous listener for segment changes.
pub trait SegmentObserver: Send + Sync {
    fn on_segment_changed(&self, change: &SegmentChange);
}

#[derive(Default)]
pub struct SegmentEventQueue {
    observers: RwLock<Vec<Arc<dyn SegmentObserver>>>,
    pending: Mutex<VecDeque<SegmentChange>>,
}

impl SegmentEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn SegmentObserver>) {
        self.observers.write().push(observer);
    }

    pub fn publish(&self, change: SegmentChange) {
        // Clone the list so observers may publish or subscribe re-entrantly.
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_segment_changed(&change);
        }
        self.pending.lock().push_back(change);
    }

    /// Remove and return every pending change, oldest first.
    pub fn drain(&self) -> Vec<SegmentChange> {
        self.pending.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// In-memory observer that captures changes for testing.
#[derive(Default)]
pub struct CaptureObserver {
    changes: Mutex<Vec<SegmentChange>>,
}

impl CaptureObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<SegmentChange> {
        self.changes.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.changes.lock().len()
    }
}

impl SegmentObserver for CaptureObserver {
    fn on_segment_changed(&self, change: &SegmentChange) {
        self.changes.lock().push(change.clone());
    }
}
