pub mod catalog;
pub mod engine;
pub mod retention;
pub mod scheduler;

pub use catalog::Catalog;
pub use engine::MonetizationEngine;
pub use retention::{EconomyService, Grant, LoggingEconomy, RecordingEconomy, RetentionPolicy};
pub use scheduler::{Scheduler, SchedulerHandle};
