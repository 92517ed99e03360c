//! Risk assessment data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk category classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    /// Determine the category from a score and ordered thresholds.
    pub fn from_score(score: f64, thresholds: &CategoryThresholds) -> Self {
        if score >= thresholds.critical {
            RiskCategory::Critical
        } else if score >= thresholds.high {
            RiskCategory::High
        } else if score >= thresholds.medium {
            RiskCategory::Medium
        } else if score >= thresholds.low {
            RiskCategory::Low
        } else {
            RiskCategory::Minimal
        }
    }
}

/// Category thresholds, strictly descending: critical > high > medium > low.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for CategoryThresholds {
    fn default() -> Self {
        Self {
            critical: 0.8,
            high: 0.6,
            medium: 0.4,
            low: 0.2,
        }
    }
}

/// Opaque model version identifier, pinned into every assessment so a score
/// can be reproduced against the exact artifact that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(pub String);

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-layer component scores. A `None` marks a layer that failed or timed
/// out and was excluded from the weighted combination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub r3_score: Option<f64>,
    pub arsm_score: Option<f64>,
    pub ml_score: Option<f64>,
}

/// Which assessment layer produced an explanation entry.
///
/// Ordering doubles as tie-break priority: rules outrank graph, graph
/// outranks model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    Rule,
    Graph,
    Model,
}

/// Direction of an explanation's contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Increases,
    Decreases,
}

impl Impact {
    pub fn of(importance: f64) -> Self {
        if importance < 0.0 {
            Impact::Decreases
        } else {
            Impact::Increases
        }
    }
}

/// One entry in the ranked, auditable explanation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub source: ExplanationSource,
    /// Rule id or feature name, depending on the source layer.
    #[serde(rename = "feature")]
    pub name: String,
    /// Observed value of the rule contribution or feature.
    pub value: f64,
    /// Signed contribution to the risk signal.
    pub importance: f64,
    pub impact: Impact,
}

/// Final, immutable verdict for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub transaction_id: String,
    /// Unique reference for this assessment execution, usable for status
    /// lookups alongside the transaction id.
    pub execution_ref: String,
    pub component_scores: ComponentScores,
    /// Weighted combination of the available component scores, in [0, 1].
    pub final_risk_score: f64,
    pub risk_category: RiskCategory,
    /// Ranked explanation entries, most significant first.
    pub explanations: Vec<Explanation>,
    /// True when one or more components were excluded and the remaining
    /// weights were renormalized.
    pub degraded: bool,
    /// True when a regulatory override forced the category.
    pub override_applied: bool,
    /// Set when the sanctions source could not be consulted or a rule
    /// failed to evaluate; the verdict must be reviewed by a human.
    pub requires_manual_review: bool,
    /// Version of the model artifact active when this assessment ran.
    pub model_version: Option<ModelVersion>,
    /// Fingerprint of the configuration active when this assessment ran.
    pub config_version: String,
    pub assessed_at: DateTime<Utc>,
}
