//! Static content loaded at startup: segmentation rules, experiments and
//! base product prices. Any invalid entry fails the whole load.

use circuit_core::config::SegmentationConfig;
use circuit_core::{MonetizationError, MonetizationResult};
use circuit_experiments::{validate_product_overlap, Experiment};
use circuit_segmentation::{default_rules, validate_rules, SegmentationRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Empty means the built-in rules from configured thresholds.
    #[serde(default)]
    pub rules: Vec<SegmentationRule>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    /// Base price per product id.
    #[serde(default)]
    pub products: BTreeMap<String, f64>,
}

impl Catalog {
    pub fn from_json(json: &str) -> MonetizationResult<Self> {
        let catalog: Catalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> MonetizationResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            rules = catalog.rules.len(),
            experiments = catalog.experiments.len(),
            products = catalog.products.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    pub fn validate(&self) -> MonetizationResult<()> {
        if !self.rules.is_empty() {
            validate_rules(&self.rules)?;
        }
        for experiment in &self.experiments {
            experiment.validate()?;
        }
        validate_product_overlap(&self.experiments)?;
        for (product_id, price) in &self.products {
            if !price.is_finite() || *price <= 0.0 {
                return Err(MonetizationError::InvalidPrice {
                    product_id: product_id.clone(),
                    price: *price,
                });
            }
        }
        Ok(())
    }

    /// Loaded rules, or the built-in set when none were supplied.
    pub fn rules_or_default(&self, config: &SegmentationConfig) -> Vec<SegmentationRule> {
        if self.rules.is_empty() {
            default_rules(config)
        } else {
            self.rules.clone()
        }
    }

    pub fn base_price(&self, product_id: &str) -> Option<f64> {
        self.products.get(product_id).copied()
    }
}
