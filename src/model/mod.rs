//! ML anomaly detection components (TAD-X)

pub mod artifact;
pub mod inference;

pub use artifact::{demo_artifact, DecisionTree, ModelArtifact, TreeNode};
pub use inference::{AnomalyScorer, Attribution, InferenceOutput};
