//! TAD-X anomaly scoring with explainable attributions.
//!
//! The scorer evaluates the loaded tree ensemble and produces, alongside
//! the probability-like score, an additive attribution per feature:
//! `baseline + Σ importance` equals the raw margin exactly, so every score
//! can be audited back to its inputs. The artifact version rides along on
//! every result.

use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::model::artifact::ModelArtifact;
use crate::types::{Impact, ModelVersion};
use tracing::debug;

/// Per-feature signed contribution to the model output.
#[derive(Debug, Clone)]
pub struct Attribution {
    pub feature: String,
    pub value: f64,
    pub importance: f64,
    pub impact: Impact,
}

/// Result of one inference call.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    /// Probability-like score in [0, 1]
    pub score: f64,
    /// Raw ensemble margin before the sigmoid
    pub raw_margin: f64,
    /// Expected margin with no feature information
    pub baseline: f64,
    pub attributions: Vec<Attribution>,
    pub model_version: ModelVersion,
}

/// Black-box inference interface over the pretrained ensemble.
pub struct AnomalyScorer {
    artifact: ModelArtifact,
    version: ModelVersion,
}

impl AnomalyScorer {
    /// Wrap a loaded artifact. The artifact's feature schema must match
    /// the extractor's.
    pub fn new(artifact: ModelArtifact) -> PipelineResult<Self> {
        artifact.validate_structure()?;
        if artifact.feature_names != FEATURE_NAMES {
            return Err(PipelineError::Config(format!(
                "artifact feature schema {:?} does not match extractor schema",
                artifact.feature_names
            )));
        }
        let version = ModelVersion(artifact.version.clone());
        Ok(Self { artifact, version })
    }

    pub fn model_version(&self) -> &ModelVersion {
        &self.version
    }

    /// Score a feature vector and attribute the margin to features.
    pub fn infer(&self, features: &FeatureVector) -> PipelineResult<InferenceOutput> {
        let values = features.values();
        if values.len() != self.artifact.feature_names.len() {
            return Err(PipelineError::ComponentFailure {
                component: "tad_x",
                reason: format!(
                    "feature vector has {} values, model expects {}",
                    values.len(),
                    self.artifact.feature_names.len()
                ),
            });
        }

        let mut margin = self.artifact.bias;
        let mut importances = vec![0.0f64; values.len()];

        for tree in &self.artifact.trees {
            let (leaf_value, deltas) = tree.walk(values);
            margin += leaf_value;
            for (feature, delta) in deltas {
                importances[feature] += delta;
            }
        }

        let baseline = self.artifact.baseline();
        let score = sigmoid(margin);

        let attributions = self
            .artifact
            .feature_names
            .iter()
            .zip(values.iter().zip(importances.iter()))
            .map(|(name, (&value, &importance))| Attribution {
                feature: name.clone(),
                value,
                importance,
                impact: Impact::of(importance),
            })
            .collect();

        debug!(
            score = score,
            raw_margin = margin,
            model_version = %self.version,
            "anomaly inference complete"
        );

        Ok(InferenceOutput {
            score,
            raw_margin: margin,
            baseline,
            attributions,
            model_version: self.version.clone(),
        })
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::artifact::demo_artifact;

    fn scorer() -> AnomalyScorer {
        AnomalyScorer::new(demo_artifact()).unwrap()
    }

    fn quiet_features() -> FeatureVector {
        FeatureVector::from_values(vec![250.0, 14.0, 2.0, 3.0, 2.0, 0.0, 0.0, 0.0])
    }

    fn loud_features() -> FeatureVector {
        FeatureVector::from_values(vec![50_000.0, 3.0, 6.0, 180.0, 2.0, 0.0, 0.9, 0.6])
    }

    #[test]
    fn test_score_is_probability_like() {
        let s = scorer();
        for fv in [quiet_features(), loud_features()] {
            let out = s.infer(&fv).unwrap();
            assert!((0.0..=1.0).contains(&out.score));
        }
    }

    #[test]
    fn test_risky_features_score_higher() {
        let s = scorer();
        let quiet = s.infer(&quiet_features()).unwrap();
        let loud = s.infer(&loud_features()).unwrap();
        assert!(loud.score > quiet.score);
    }

    #[test]
    fn test_attribution_completeness() {
        let s = scorer();
        for fv in [quiet_features(), loud_features()] {
            let out = s.infer(&fv).unwrap();
            let attributed: f64 = out.attributions.iter().map(|a| a.importance).sum();
            assert!(
                (out.baseline + attributed - out.raw_margin).abs() < 1e-3,
                "baseline {} + attributions {} should equal margin {}",
                out.baseline,
                attributed,
                out.raw_margin
            );
        }
    }

    #[test]
    fn test_attributions_cover_schema() {
        let out = scorer().infer(&quiet_features()).unwrap();
        assert_eq!(out.attributions.len(), FEATURE_NAMES.len());
        for (attribution, name) in out.attributions.iter().zip(FEATURE_NAMES) {
            assert_eq!(attribution.feature, name);
            assert_eq!(attribution.impact, Impact::of(attribution.importance));
        }
    }

    #[test]
    fn test_model_version_is_pinned() {
        let s = scorer();
        let out = s.infer(&quiet_features()).unwrap();
        assert_eq!(&out.model_version, s.model_version());
    }

    #[test]
    fn test_inference_is_deterministic() {
        let s = scorer();
        let a = s.infer(&loud_features()).unwrap();
        let b = s.infer(&loud_features()).unwrap();
        assert_eq!(a.score, b.score);
        assert_eq!(a.raw_margin, b.raw_margin);
    }

    #[test]
    fn test_wrong_arity_is_component_failure() {
        let s = scorer();
        let short = FeatureVector::from_values(vec![1.0, 2.0]);
        assert!(matches!(
            s.infer(&short),
            Err(PipelineError::ComponentFailure { component: "tad_x", .. })
        ));
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let mut artifact = demo_artifact();
        artifact.feature_names[0] = "not_a_feature".into();
        assert!(AnomalyScorer::new(artifact).is_err());
    }
}
