//! Fan-out/join orchestration of the three assessment layers.
//!
//! Each transaction is dispatched concurrently to the rule engine, the
//! graph scorer and the anomaly scorer. The join waits for all three or
//! the overall deadline, whichever comes first; stragglers are aborted.
//! A missing component never fails the request: its weight is excluded,
//! the remaining weights are renormalized, and the result is flagged
//! `degraded`. A sanctions override always wins over the weighted score.

use crate::config::{ConfigStore, LayerWeights};
use crate::error::{PipelineError, PipelineResult};
use crate::explain;
use crate::features::FeatureExtractor;
use crate::graph::{GraphFeatureSet, GraphRiskScorer};
use crate::model::{AnomalyScorer, InferenceOutput};
use crate::rules::{RuleEngine, RuleVerdict};
use crate::status::StatusStore;
use crate::types::{
    CategoryThresholds, ComponentScores, ModelVersion, RiskAssessment, RiskCategory, Transaction,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Aggregator {
    rules: Arc<RuleEngine>,
    graph: Arc<GraphRiskScorer>,
    features: Arc<FeatureExtractor>,
    anomaly: Option<Arc<AnomalyScorer>>,
    weights: LayerWeights,
    thresholds: CategoryThresholds,
    overall_timeout: Duration,
    config_version: String,
    status: Arc<StatusStore>,
}

impl Aggregator {
    pub fn new(
        config: &ConfigStore,
        rules: Arc<RuleEngine>,
        graph: Arc<GraphRiskScorer>,
        features: Arc<FeatureExtractor>,
        anomaly: Option<Arc<AnomalyScorer>>,
        status: Arc<StatusStore>,
    ) -> Self {
        let cfg = config.config();
        Self {
            rules,
            graph,
            features,
            anomaly,
            weights: cfg.risk_scoring.weights,
            thresholds: cfg.risk_scoring.thresholds.clone(),
            overall_timeout: Duration::from_millis(cfg.pipeline.overall_timeout_ms),
            config_version: config.version().to_string(),
            status,
        }
    }

    pub fn status_store(&self) -> Arc<StatusStore> {
        self.status.clone()
    }

    /// Pinned version of the active model artifact, if one is loaded.
    pub fn model_version(&self) -> Option<ModelVersion> {
        self.anomaly.as_ref().map(|s| s.model_version().clone())
    }

    /// Assess one transaction end to end.
    pub async fn assess(&self, tx: &Transaction) -> PipelineResult<RiskAssessment> {
        tx.validate()?;
        self.status.mark_pending(&tx.id);

        let timeout_ms = self.overall_timeout.as_millis() as u64;
        let deadline = Instant::now() + self.overall_timeout;

        let rules_task = {
            let engine = self.rules.clone();
            let tx = tx.clone();
            tokio::spawn(async move { engine.evaluate(&tx).await })
        };
        let graph_task = {
            let scorer = self.graph.clone();
            let tx = tx.clone();
            tokio::spawn(async move { scorer.score(&tx) })
        };
        let ml_task = self.anomaly.clone().map(|scorer| {
            let features = self.features.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let fv = features.extract(&tx)?;
                scorer.infer(&fv)
            })
        });

        let rules_outcome = join_component("r3_engine", rules_task, deadline, timeout_ms).await;
        let graph_outcome = join_component("arsm", graph_task, deadline, timeout_ms).await;
        let ml_outcome = match ml_task {
            Some(task) => Some(join_component("tad_x", task, deadline, timeout_ms).await),
            None => None,
        };

        let mut degraded = false;
        let mut requires_manual_review = false;

        let rule_verdict: Option<RuleVerdict> = match rules_outcome {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                // Without a rule verdict the sanctions screen is unverified;
                // never let that pass silently.
                warn!(transaction_id = %tx.id, error = %e, "rule engine unavailable");
                degraded = true;
                requires_manual_review = true;
                None
            }
        };

        let graph_result: Option<(f64, GraphFeatureSet)> = match graph_outcome {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) | Err(e) => {
                warn!(transaction_id = %tx.id, error = %e, "graph scorer unavailable");
                degraded = true;
                None
            }
        };

        let ml_result: Option<InferenceOutput> = match ml_outcome {
            Some(Ok(Ok(output))) => Some(output),
            Some(Ok(Err(e))) | Some(Err(e)) => {
                warn!(transaction_id = %tx.id, error = %e, "anomaly scorer unavailable");
                degraded = true;
                None
            }
            None => {
                // No model artifact is loaded at all.
                degraded = true;
                None
            }
        };

        if let Some(verdict) = &rule_verdict {
            requires_manual_review |= verdict.requires_manual_review;
        }

        let component_scores = ComponentScores {
            r3_score: rule_verdict.as_ref().map(|v| v.score),
            arsm_score: graph_result.as_ref().map(|(score, _)| *score),
            ml_score: ml_result.as_ref().map(|out| out.score),
        };

        let Some(final_risk_score) = weighted_blend(&component_scores, &self.weights) else {
            let reason = "all assessment components unavailable".to_string();
            self.status.mark_failed(&tx.id, reason.clone());
            return Err(PipelineError::ComponentFailure {
                component: "aggregator",
                reason,
            });
        };

        let override_applied = rule_verdict
            .as_ref()
            .map(|v| v.override_triggered)
            .unwrap_or(false);
        let risk_category = if override_applied {
            RiskCategory::Critical
        } else {
            RiskCategory::from_score(final_risk_score, &self.thresholds)
        };

        let explanations = explain::combine(
            rule_verdict
                .as_ref()
                .map(|v| v.results.as_slice())
                .unwrap_or(&[]),
            graph_result.as_ref().map(|(_, features)| features),
            ml_result.as_ref().map(|out| out.attributions.as_slice()),
        );

        let assessment = RiskAssessment {
            transaction_id: tx.id.clone(),
            execution_ref: uuid::Uuid::new_v4().to_string(),
            component_scores,
            final_risk_score,
            risk_category,
            explanations,
            degraded,
            override_applied,
            requires_manual_review,
            model_version: ml_result
                .map(|out| out.model_version)
                .or_else(|| self.model_version()),
            config_version: self.config_version.clone(),
            assessed_at: Utc::now(),
        };

        info!(
            transaction_id = %tx.id,
            final_risk_score = assessment.final_risk_score,
            risk_category = ?assessment.risk_category,
            degraded = assessment.degraded,
            override_applied = assessment.override_applied,
            "assessment complete"
        );

        self.status
            .mark_complete(&tx.id, Arc::new(assessment.clone()));
        Ok(assessment)
    }
}

/// Await a spawned component until the shared deadline; abort it on
/// timeout so cancelled work never outlives the request.
async fn join_component<R>(
    component: &'static str,
    mut handle: JoinHandle<R>,
    deadline: Instant,
    timeout_ms: u64,
) -> PipelineResult<R> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => Err(PipelineError::ComponentFailure {
            component,
            reason: join_error.to_string(),
        }),
        Err(_) => {
            handle.abort();
            Err(PipelineError::ComponentTimeout {
                component,
                timeout_ms,
            })
        }
    }
}

/// Weighted average over the available components with weights
/// renormalized to sum to 1. `None` when every component is missing.
fn weighted_blend(scores: &ComponentScores, weights: &LayerWeights) -> Option<f64> {
    let parts = [
        (scores.r3_score, weights.r3_engine),
        (scores.arsm_score, weights.arsm),
        (scores.ml_score, weights.tad_x),
    ];

    let mut weighted_sum = 0.0;
    let mut active_weight = 0.0;
    for (score, weight) in parts {
        if let Some(score) = score {
            weighted_sum += score * weight;
            active_weight += weight;
        }
    }

    (active_weight > 0.0).then(|| (weighted_sum / active_weight).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> LayerWeights {
        LayerWeights {
            r3_engine: 0.3,
            arsm: 0.3,
            tad_x: 0.4,
        }
    }

    fn scores(r3: Option<f64>, arsm: Option<f64>, ml: Option<f64>) -> ComponentScores {
        ComponentScores {
            r3_score: r3,
            arsm_score: arsm,
            ml_score: ml,
        }
    }

    #[test]
    fn test_blend_with_all_components() {
        let blended = weighted_blend(&scores(Some(0.2), Some(0.5), Some(0.6)), &weights()).unwrap();
        // 0.2*0.3 + 0.5*0.3 + 0.6*0.4 = 0.45
        assert!((blended - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_blend_renormalizes_on_missing_component() {
        let blended = weighted_blend(&scores(Some(0.2), None, Some(0.6)), &weights()).unwrap();
        // (0.2*0.3 + 0.6*0.4) / 0.7
        let expected = (0.2 * 0.3 + 0.6 * 0.4) / 0.7;
        assert!((blended - expected).abs() < 1e-9);
    }

    #[test]
    fn test_blend_single_component_passes_through() {
        let blended = weighted_blend(&scores(None, None, Some(0.6)), &weights()).unwrap();
        assert!((blended - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_blend_all_missing_is_none() {
        assert!(weighted_blend(&scores(None, None, None), &weights()).is_none());
    }

    #[test]
    fn test_blend_stays_in_unit_interval() {
        let blended = weighted_blend(&scores(Some(1.0), Some(1.0), Some(1.0)), &weights()).unwrap();
        assert!(blended <= 1.0);
        let blended = weighted_blend(&scores(Some(0.0), Some(0.0), Some(0.0)), &weights()).unwrap();
        assert!(blended >= 0.0);
    }
}
