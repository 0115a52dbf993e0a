//! Experiment tracker: variant assignment, impression/conversion tracking
//! and completion.

use crate::experiment::{
    CompletionReason, Experiment, ExperimentResult, ExperimentStatus, VariantMetrics,
};
use crate::stats::{self, SignificanceResult};
use chrono::{DateTime, Utc};
use circuit_core::config::ExperimentsConfig;
use circuit_core::{MonetizationError, MonetizationResult, VariantRef};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A product price claimed by an active experiment for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantClaim {
    pub variant: VariantRef,
    pub price_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Recorded,
    /// The update completed the experiment (or found it already expired).
    Completed(ExperimentResult),
    /// The experiment is unknown or not active; nothing was recorded.
    Ignored,
}

pub struct ExperimentTracker {
    /// Registration order decides which experiment claims a shared product.
    experiments: RwLock<Vec<Experiment>>,
    assignments: DashMap<(String, String), usize>,
    /// (experiment, player) pairs shown a variant price; the flag marks a
    /// counted conversion.
    exposures: DashMap<(String, String), bool>,
    config: ExperimentsConfig,
}

impl ExperimentTracker {
    pub fn new(config: ExperimentsConfig) -> Self {
        Self {
            experiments: RwLock::new(Vec::new()),
            assignments: DashMap::new(),
            exposures: DashMap::new(),
            config,
        }
    }

    /// Register a new experiment in `Draft`.
    pub fn register(&self, experiment: Experiment) -> MonetizationResult<()> {
        if experiment.status != ExperimentStatus::Draft {
            return Err(MonetizationError::InvalidExperiment {
                experiment: experiment.id.clone(),
                reason: format!("new experiments must be draft, found {}", experiment.status),
            });
        }
        self.restore(experiment)
    }

    /// Load a persisted experiment in whatever status it was saved.
    pub fn restore(&self, mut experiment: Experiment) -> MonetizationResult<()> {
        experiment.validate()?;
        if experiment.metrics.is_empty() {
            experiment.metrics = vec![VariantMetrics::default(); experiment.variants.len()];
        }
        let mut experiments = self.experiments.write();
        if experiments.iter().any(|e| e.id == experiment.id) {
            return Err(MonetizationError::InvalidExperiment {
                experiment: experiment.id.clone(),
                reason: "duplicate experiment id".into(),
            });
        }
        if !experiment.status.is_terminal() {
            for other in experiments.iter().filter(|e| !e.status.is_terminal()) {
                if let Some(product) = experiment.shared_product(other) {
                    return Err(MonetizationError::InvalidExperiment {
                        experiment: experiment.id.clone(),
                        reason: format!("product '{product}' already claimed by '{}'", other.id),
                    });
                }
            }
        }
        info!(
            experiment_id = %experiment.id,
            variants = experiment.variants.len(),
            status = %experiment.status,
            "Experiment registered"
        );
        experiments.push(experiment);
        Ok(())
    }

    pub fn start(&self, experiment_id: &str, now: DateTime<Utc>) -> MonetizationResult<()> {
        self.with_experiment(experiment_id, |exp| {
            exp.transition(ExperimentStatus::Active)?;
            exp.start_at = Some(now);
            info!(experiment_id = %exp.id, end_at = %exp.end_at, "Experiment started");
            Ok(())
        })
    }

    pub fn cancel(&self, experiment_id: &str, now: DateTime<Utc>) -> MonetizationResult<()> {
        self.with_experiment(experiment_id, |exp| {
            exp.transition(ExperimentStatus::Cancelled)?;
            exp.completed_at = Some(now);
            info!(experiment_id = %exp.id, "Experiment cancelled");
            Ok(())
        })?;
        self.forget(experiment_id);
        Ok(())
    }

    pub fn get(&self, experiment_id: &str) -> Option<Experiment> {
        self.experiments
            .read()
            .iter()
            .find(|e| e.id == experiment_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Experiment> {
        self.experiments.read().clone()
    }

    pub fn result(&self, experiment_id: &str) -> Option<ExperimentResult> {
        self.experiments
            .read()
            .iter()
            .find(|e| e.id == experiment_id)
            .and_then(ExperimentResult::from_experiment)
    }

    /// Deterministic variant index for `player_id`, memoized per
    /// experiment. `None` for an unknown experiment.
    pub fn assign_variant(&self, experiment_id: &str, player_id: &str) -> Option<usize> {
        let count = self
            .experiments
            .read()
            .iter()
            .find(|e| e.id == experiment_id)
            .map(|e| e.variants.len())?;
        Some(self.assign(experiment_id, player_id, count))
    }

    /// The first active, unexpired experiment (in registration order) that
    /// controls `product_id`, with the player's variant.
    pub fn claim(
        &self,
        product_id: &str,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Option<VariantClaim> {
        let experiments = self.experiments.read();
        let exp = experiments.iter().find(|e| {
            e.status == ExperimentStatus::Active && !e.is_expired(now) && e.claims(product_id)
        })?;
        let index = self.assign(&exp.id, player_id, exp.variants.len());
        Some(VariantClaim {
            variant: exp.variant_ref(index)?,
            price_multiplier: exp.variants[index].price_multiplier,
        })
    }

    pub fn track_impression(
        &self,
        experiment_id: &str,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        let key = (experiment_id.to_string(), player_id.to_string());
        self.track(experiment_id, player_id, now, false, |metrics| {
            metrics.impressions += 1;
            self.exposures.entry(key).or_insert(false);
        })
    }

    /// Record a conversion, then run the significance check. Counted at most
    /// once per player, and only for players who were shown the variant.
    pub fn track_conversion(
        &self,
        experiment_id: &str,
        player_id: &str,
        revenue: f64,
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        let key = (experiment_id.to_string(), player_id.to_string());
        let exposure = self.exposures.get(&key).map(|converted| *converted);
        match exposure {
            None => {
                debug!(
                    experiment_id = %experiment_id,
                    player_id = %player_id,
                    "Conversion without impression ignored"
                );
                return TrackOutcome::Ignored;
            }
            Some(true) => {
                debug!(
                    experiment_id = %experiment_id,
                    player_id = %player_id,
                    "Repeat conversion ignored"
                );
                return TrackOutcome::Ignored;
            }
            Some(false) => {}
        }
        self.track(experiment_id, player_id, now, true, |metrics| {
            metrics.conversions += 1;
            metrics.revenue += revenue.max(0.0);
            self.exposures.insert(key, true);
        })
    }

    pub fn significance(&self, experiment_id: &str) -> Option<SignificanceResult> {
        let experiments = self.experiments.read();
        let exp = experiments.iter().find(|e| e.id == experiment_id)?;
        stats::compare(&exp.metrics, self.config.min_impressions_per_variant)
    }

    /// Complete every active experiment whose end timestamp has passed.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<ExperimentResult> {
        let mut completed = Vec::new();
        for exp in self.experiments.write().iter_mut() {
            if exp.status == ExperimentStatus::Active && exp.is_expired(now) {
                if let Some(result) = self.complete(exp, CompletionReason::EndDate, now) {
                    completed.push(result);
                }
            }
        }
        completed
    }

    fn track<F>(
        &self,
        experiment_id: &str,
        player_id: &str,
        now: DateTime<Utc>,
        conversion: bool,
        update: F,
    ) -> TrackOutcome
    where
        F: FnOnce(&mut VariantMetrics),
    {
        let mut experiments = self.experiments.write();
        let Some(exp) = experiments.iter_mut().find(|e| e.id == experiment_id) else {
            warn!(experiment_id = %experiment_id, "Tracking call for unknown experiment ignored");
            return TrackOutcome::Ignored;
        };

        if exp.status != ExperimentStatus::Active {
            let err = MonetizationError::ExperimentNotActive {
                experiment: exp.id.clone(),
                status: exp.status.to_string(),
            };
            warn!(error = %err, "Tracking call ignored");
            return TrackOutcome::Ignored;
        }
        if exp.is_expired(now) {
            return match self.complete(exp, CompletionReason::EndDate, now) {
                Some(result) => TrackOutcome::Completed(result),
                None => TrackOutcome::Ignored,
            };
        }

        let index = self.assign(&exp.id, player_id, exp.variants.len());
        update(&mut exp.metrics[index]);

        let significance = stats::compare(&exp.metrics, self.config.min_impressions_per_variant);
        exp.last_significance = significance;

        // Promotion is decided on conversions only.
        let promote = conversion
            && exp.auto_promote_winner
            && exp.total_impressions() >= exp.min_sample_size
            && significance.is_some_and(|s| s.confidence >= self.config.promotion_confidence);
        if promote {
            if let Some(result) = self.complete(exp, CompletionReason::Significance, now) {
                return TrackOutcome::Completed(result);
            }
        }
        TrackOutcome::Recorded
    }

    fn complete(
        &self,
        exp: &mut Experiment,
        reason: CompletionReason,
        now: DateTime<Utc>,
    ) -> Option<ExperimentResult> {
        if let Err(e) = exp.transition(ExperimentStatus::Completed) {
            warn!(error = %e, "Experiment completion rejected");
            return None;
        }
        exp.winner = exp.leading_variant();
        exp.completion_reason = Some(reason);
        exp.completed_at = Some(now);
        info!(
            experiment_id = %exp.id,
            reason = ?reason,
            winner = ?exp.winner.map(|i| exp.variants[i].name.as_str()),
            impressions = exp.total_impressions(),
            "Experiment completed"
        );
        self.forget(&exp.id);
        ExperimentResult::from_experiment(exp)
    }

    /// Drop memoized assignments and exposures of a finished experiment.
    fn forget(&self, experiment_id: &str) {
        self.assignments.retain(|(id, _), _| id != experiment_id);
        self.exposures.retain(|(id, _), _| id != experiment_id);
    }

    fn assign(&self, experiment_id: &str, player_id: &str, variant_count: usize) -> usize {
        if variant_count == 0 {
            return 0;
        }
        *self
            .assignments
            .entry((experiment_id.to_string(), player_id.to_string()))
            .or_insert_with(|| {
                let index = (hash_player(player_id) % variant_count as u64) as usize;
                debug!(experiment_id = %experiment_id, player_id = %player_id, index, "Variant assigned");
                index
            })
    }

    fn with_experiment<T>(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&mut Experiment) -> MonetizationResult<T>,
    ) -> MonetizationResult<T> {
        let mut experiments = self.experiments.write();
        let exp = experiments
            .iter_mut()
            .find(|e| e.id == experiment_id)
            .ok_or_else(|| MonetizationError::ExperimentNotFound(experiment_id.to_string()))?;
        f(exp)
    }
}

/// FNV-1a: a pure function of the player id, stable across processes.
pub fn hash_player(player_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in player_id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
