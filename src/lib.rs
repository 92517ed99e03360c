//! Risk Assessment Pipeline Library
//!
//! Assigns a fraud/compliance risk score to cryptocurrency transactions by
//! combining three concurrent assessment layers — deterministic regulatory
//! rules (R3), graph-based behavioral analysis (ARSM), and explainable ML
//! anomaly detection (TAD-X) — into one auditable decision.

pub mod aggregator;
pub mod config;
pub mod consumer;
pub mod error;
pub mod explain;
pub mod features;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod producer;
pub mod retry;
pub mod rules;
pub mod status;
pub mod types;

pub use aggregator::Aggregator;
pub use config::{AppConfig, ConfigStore};
pub use consumer::TransactionConsumer;
pub use error::{PipelineError, PipelineResult};
pub use features::FeatureExtractor;
pub use graph::GraphRiskScorer;
pub use model::AnomalyScorer;
pub use producer::AssessmentProducer;
pub use rules::RuleEngine;
pub use status::StatusStore;
pub use types::{RiskAssessment, Transaction};
