//! Player segmentation: profile store, weighted rule engine, segment
//! classifier and churn scoring.

pub mod builder;
pub mod churn;
pub mod classifier;
pub mod engine;
pub mod metric;
pub mod predicates;
pub mod profile;
pub mod rules;

pub use builder::{default_rules, RuleBuilder};
pub use churn::ChurnModel;
pub use classifier::{Classification, SegmentClassifier};
pub use engine::{RuleEngine, RuleScore};
pub use metric::{MetricId, MetricValue};
pub use predicates::Condition;
pub use profile::{session_end, PlayerProfile, ProfileStore, DEFAULT_MAX_SESSION_MINUTES};
pub use rules::{validate_rules, Criterion, SegmentationRule};
