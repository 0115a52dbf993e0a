use thiserror::Error;

pub type MonetizationResult<T> = Result<T, MonetizationError>;

#[derive(Error, Debug)]
pub enum MonetizationError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Invalid weight {weight} on rule '{rule}': weights must be within [0, 1]")]
    InvalidRuleWeight { rule: String, weight: f64 },

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Invalid experiment '{experiment}': {reason}")]
    InvalidExperiment { experiment: String, reason: String },

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Experiment '{experiment}' is not active (status: {status})")]
    ExperimentNotActive { experiment: String, status: String },

    #[error("Invalid transition for experiment '{experiment}': {from} -> {to}")]
    InvalidTransition {
        experiment: String,
        from: String,
        to: String,
    },

    #[error("Invalid price for product '{product_id}': {price}")]
    InvalidPrice { product_id: String, price: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for MonetizationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
