pub mod aggregator;
pub mod cohort;
pub mod ledger;
pub mod revenue;

pub use aggregator::{Alert, AnalyticsAggregator, DashboardSnapshot, LedgerStats};
pub use cohort::RetentionPoint;
pub use ledger::RevenueLedger;
pub use revenue::{RevenueMetrics, TimeWindow, VariantRevenue};
