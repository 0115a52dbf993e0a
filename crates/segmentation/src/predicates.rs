//! Criterion conditions and their evaluation against metric values.

use crate::metric::MetricValue;
use serde::{Deserialize, Serialize};

/// Tolerance for `Equals` on floating-point metrics.
const EQUALS_EPSILON: f64 = 1e-9;

/// Comparison applied to one metric. Catalog files may use either the
/// snake_case name or the operator symbol as the `op` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    #[serde(alias = ">")]
    GreaterThan { value: f64 },
    #[serde(alias = "<")]
    LessThan { value: f64 },
    #[serde(alias = "==")]
    Equals { value: f64 },
    /// Inclusive on both ends.
    Between { min: f64, max: f64 },
    /// Substring match on text metrics, membership on tag sets.
    Contains { value: String },
}

impl Condition {
    pub fn matches(&self, actual: &MetricValue<'_>) -> bool {
        match (self, actual) {
            (Self::GreaterThan { value }, MetricValue::Number(v)) => v > value,
            (Self::LessThan { value }, MetricValue::Number(v)) => v < value,
            (Self::Equals { value }, MetricValue::Number(v)) => {
                (v - value).abs() < EQUALS_EPSILON
            }
            (Self::Between { min, max }, MetricValue::Number(v)) => min <= v && v <= max,
            (Self::Contains { value }, MetricValue::Text(text)) => text.contains(value.as_str()),
            (Self::Contains { value }, MetricValue::Tags(tags)) => tags.contains(value),
            _ => false,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Self::GreaterThan { .. } => ">",
            Self::LessThan { .. } => "<",
            Self::Equals { .. } => "==",
            Self::Between { .. } => "between",
            Self::Contains { .. } => "contains",
        }
    }
}
