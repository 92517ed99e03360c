//! Versioned gradient-boosted-tree model artifact.
//!
//! The artifact is trained offline and consumed here as an opaque JSON
//! document: a bias plus a forest of binary trees whose nodes carry the
//! expected margin of their subtree. Per-node expected values are what
//! make exact decision-path attributions possible downstream. Retraining
//! produces a new artifact version without changing this contract.

use crate::config::TadXConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::{with_backoff, BackoffPolicy};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// One node of a decision tree. Internal nodes carry a split; leaves carry
/// only their value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Split feature index; `None` marks a leaf.
    #[serde(default)]
    pub feature: Option<usize>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    /// Expected margin contribution of the subtree rooted here.
    pub value: f64,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }
}

/// A single regression tree in node-array form; node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn root_value(&self) -> f64 {
        self.nodes.first().map(|n| n.value).unwrap_or(0.0)
    }

    /// Walk the decision path for `features`. Returns the leaf value and
    /// the per-split change in expected value, credited to the split
    /// feature. The deltas telescope: root value + their sum equals the
    /// leaf value.
    pub fn walk(&self, features: &[f64]) -> (f64, Vec<(usize, f64)>) {
        let mut idx = 0;
        let mut deltas = Vec::new();
        loop {
            let node = &self.nodes[idx];
            let Some(feature) = node.feature else {
                return (node.value, deltas);
            };
            let child = if features[feature] < node.threshold {
                node.left
            } else {
                node.right
            };
            deltas.push((feature, self.nodes[child].value - node.value));
            idx = child;
        }
    }
}

/// The loaded model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub model_type: String,
    pub trained_at: DateTime<Utc>,
    /// Global margin offset (log-odds bias)
    pub bias: f64,
    pub feature_names: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl ModelArtifact {
    pub fn from_json(raw: &str) -> PipelineResult<Self> {
        let artifact: ModelArtifact =
            serde_json::from_str(raw).map_err(|e| PipelineError::ExternalDependency {
                dependency: "model_artifact",
                reason: format!("malformed artifact: {e}"),
            })?;
        artifact.validate_structure()?;
        Ok(artifact)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::ExternalDependency {
                dependency: "model_artifact",
                reason: e.to_string(),
            }
        })?;
        Self::from_json(&raw)
    }

    /// Load with bounded backoff, then check the artifact against the
    /// configured model expectations.
    pub async fn load_for_config(cfg: &TadXConfig, policy: BackoffPolicy) -> PipelineResult<Self> {
        let path = cfg.artifact_path.clone();
        let artifact =
            with_backoff(policy, "model_artifact_load", || {
                let result = Self::load(&path);
                async move { result }
            })
            .await?;
        artifact.validate_against(cfg)?;
        info!(
            version = %artifact.version,
            trees = artifact.trees.len(),
            "model artifact loaded"
        );
        Ok(artifact)
    }

    /// Structural sanity: a malformed forest is rejected outright.
    pub fn validate_structure(&self) -> PipelineResult<()> {
        let reject = |reason: String| PipelineError::ExternalDependency {
            dependency: "model_artifact",
            reason,
        };

        if self.version.trim().is_empty() {
            return Err(reject("artifact has no version".into()));
        }
        if self.trees.is_empty() {
            return Err(reject("artifact contains no trees".into()));
        }
        if self.feature_names.is_empty() {
            return Err(reject("artifact declares no features".into()));
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(reject(format!("tree {t} is empty")));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                if let Some(feature) = node.feature {
                    if feature >= self.feature_names.len() {
                        return Err(reject(format!(
                            "tree {t} node {i} splits on unknown feature {feature}"
                        )));
                    }
                    if node.left >= tree.nodes.len() || node.right >= tree.nodes.len() {
                        return Err(reject(format!(
                            "tree {t} node {i} has out-of-range children"
                        )));
                    }
                    if node.left <= i || node.right <= i {
                        return Err(reject(format!(
                            "tree {t} node {i} children must come after their parent"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Check the artifact against configuration. A family mismatch is an
    /// error; drifted training hyperparameters and staleness only warn.
    pub fn validate_against(&self, cfg: &TadXConfig) -> PipelineResult<()> {
        if self.model_type != cfg.model_type {
            return Err(PipelineError::Config(format!(
                "model artifact type {} does not match configured {}",
                self.model_type, cfg.model_type
            )));
        }
        if self.trees.len() != cfg.n_estimators {
            warn!(
                artifact_trees = self.trees.len(),
                configured = cfg.n_estimators,
                "artifact tree count differs from configured n_estimators"
            );
        }
        let age = Utc::now() - self.trained_at;
        if age > Duration::days(cfg.retrain_interval_days) {
            warn!(
                version = %self.version,
                age_days = age.num_days(),
                retrain_interval_days = cfg.retrain_interval_days,
                "model artifact is past its retrain interval"
            );
        }
        Ok(())
    }

    /// Expected margin before any split decision: bias plus the root
    /// expected value of every tree.
    pub fn baseline(&self) -> f64 {
        self.bias + self.trees.iter().map(DecisionTree::root_value).sum::<f64>()
    }
}

/// Small deterministic artifact over the extractor schema, used by tests
/// and local development when no trained artifact is mounted.
pub fn demo_artifact() -> ModelArtifact {
    let leaf = |value: f64| TreeNode {
        feature: None,
        threshold: 0.0,
        left: 0,
        right: 0,
        value,
    };
    let split = |feature: usize, threshold: f64, left: usize, right: usize, value: f64| TreeNode {
        feature: Some(feature),
        threshold,
        left,
        right,
        value,
    };

    ModelArtifact {
        version: "tadx-demo-001".into(),
        model_type: "gradient_boosted_trees".into(),
        trained_at: DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .expect("static timestamp")
            .with_timezone(&Utc),
        bias: -1.2,
        feature_names: crate::features::FEATURE_NAMES
            .iter()
            .map(|&s| s.to_string())
            .collect(),
        trees: vec![
            // High amounts push the margin up.
            DecisionTree {
                nodes: vec![
                    split(0, 10_000.0, 1, 2, 0.0),
                    leaf(-0.4),
                    leaf(0.8),
                ],
            },
            // Seed exposure on either endpoint dominates.
            DecisionTree {
                nodes: vec![
                    split(6, 0.1, 1, 2, 0.0),
                    leaf(-0.3),
                    split(7, 0.1, 3, 4, 0.9),
                    leaf(0.6),
                    leaf(1.4),
                ],
            },
            // Fan-out from the sender.
            DecisionTree {
                nodes: vec![
                    split(3, 100.0, 1, 2, 0.0),
                    leaf(-0.1),
                    leaf(0.5),
                ],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: f64) -> TreeNode {
        TreeNode {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
        }
    }

    fn split(feature: usize, threshold: f64, left: usize, right: usize, value: f64) -> TreeNode {
        TreeNode {
            feature: Some(feature),
            threshold,
            left,
            right,
            value,
        }
    }

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            version: "test-1".into(),
            model_type: "gradient_boosted_trees".into(),
            trained_at: Utc::now(),
            bias: -1.0,
            feature_names: vec!["f0".into(), "f1".into()],
            trees: vec![DecisionTree {
                nodes: vec![
                    split(0, 10.0, 1, 2, 0.0),
                    leaf(-0.5),
                    split(1, 0.5, 3, 4, 0.6),
                    leaf(0.2),
                    leaf(1.0),
                ],
            }],
        }
    }

    #[test]
    fn test_walk_deltas_telescope_to_leaf() {
        let a = artifact();
        let tree = &a.trees[0];

        let (leaf_value, deltas) = tree.walk(&[12.0, 0.9]);
        assert_eq!(leaf_value, 1.0);

        let path_sum: f64 = deltas.iter().map(|(_, d)| d).sum();
        assert!((tree.root_value() + path_sum - leaf_value).abs() < 1e-12);
        // Both splits were crossed and credited.
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].0, 0);
        assert_eq!(deltas[1].0, 1);
    }

    #[test]
    fn test_structure_validation_catches_bad_trees() {
        let mut a = artifact();
        a.trees[0].nodes[0].feature = Some(7); // unknown feature
        assert!(a.validate_structure().is_err());

        let mut a = artifact();
        a.trees[0].nodes[2].left = 99; // out of range child
        assert!(a.validate_structure().is_err());

        let mut a = artifact();
        a.trees.clear();
        assert!(a.validate_structure().is_err());
    }

    #[test]
    fn test_model_type_mismatch_is_rejected() {
        let a = artifact();
        let mut cfg = crate::config::AppConfig::default().ml_models.tad_x;
        cfg.model_type = "isolation_forest".into();
        assert!(matches!(
            a.validate_against(&cfg),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let a = artifact();
        let json = serde_json::to_string(&a).unwrap();
        let back = ModelArtifact::from_json(&json).unwrap();
        assert_eq!(back.version, a.version);
        assert_eq!(back.trees.len(), 1);
        assert_eq!(back.baseline(), a.baseline());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&artifact()).unwrap()).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.version, "test-1");
        assert_eq!(loaded.trees.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_external_dependency_error() {
        let err = ModelArtifact::load("/nonexistent/model.json").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ExternalDependency {
                dependency: "model_artifact",
                ..
            }
        ));
    }
}
