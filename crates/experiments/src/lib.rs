//! Price and offer experiments: deterministic variant assignment,
//! impression/conversion tracking and significance-based completion.

pub mod experiment;
pub mod stats;
pub mod tracker;

pub use experiment::{
    validate_product_overlap, CompletionReason, Experiment, ExperimentResult, ExperimentStatus,
    Variant, VariantMetrics, VariantSummary,
};
pub use stats::SignificanceResult;
pub use tracker::{ExperimentTracker, TrackOutcome, VariantClaim};
