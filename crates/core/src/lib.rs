//! Shared types, configuration, errors and the segment event queue used by
//! every Circuit Runners monetization crate.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{MonetizationError, MonetizationResult};
pub use event_bus::SegmentEventQueue;
pub use types::{PlayerSegment, RevenueEvent, RevenueEventType, SegmentChange, VariantRef};
