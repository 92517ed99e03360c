//! Graph-based behavioral risk analysis (ARSM)

pub mod cache;
pub mod scorer;
pub mod store;

pub use cache::{MetricsCache, NodeMetrics};
pub use scorer::{
    Confidence, GraphFeatureSet, GraphRiskScorer, W_CENTRALITY, W_COMMUNITY, W_PROPAGATION,
};
pub use store::{AddressGraph, Edge, GraphBuilder, NodeId};
