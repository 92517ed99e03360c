//! Type definitions for the risk assessment pipeline

pub mod assessment;
pub mod transaction;

pub use assessment::{
    CategoryThresholds, ComponentScores, Explanation, ExplanationSource, Impact, ModelVersion,
    RiskAssessment, RiskCategory,
};
pub use transaction::Transaction;
