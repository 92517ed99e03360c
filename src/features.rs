//! Feature extraction for anomaly model inference.
//!
//! Builds the fixed-schema numeric record the TAD-X model consumes, from
//! the transaction itself plus cheap O(degree) graph-store lookups. The
//! schema order must match the artifact's `feature_names`.

use crate::error::{PipelineError, PipelineResult};
use crate::graph::AddressGraph;
use crate::rules::FxRates;
use crate::types::Transaction;
use chrono::{Datelike, Timelike};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashSet;
use std::sync::Arc;

/// Fixed feature schema, in model input order.
pub const FEATURE_NAMES: [&str; 8] = [
    "amount_usd",
    "hour_of_day",
    "day_of_week",
    "from_degree",
    "to_degree",
    "shared_neighbors",
    "from_risky_exposure",
    "to_risky_exposure",
];

/// A feature vector in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Derives feature vectors from transactions and the graph snapshot.
pub struct FeatureExtractor {
    graph: Arc<AddressGraph>,
    fx: Arc<FxRates>,
}

impl FeatureExtractor {
    pub fn new(graph: Arc<AddressGraph>, fx: Arc<FxRates>) -> Self {
        Self { graph, fx }
    }

    /// Extract the feature vector for one transaction.
    pub fn extract(&self, tx: &Transaction) -> PipelineResult<FeatureVector> {
        let amount_usd = self
            .fx
            .to_usd(tx.amount, &tx.currency)
            .and_then(|usd| usd.to_f64())
            .ok_or_else(|| PipelineError::ExternalDependency {
                dependency: "fx_rates",
                reason: format!("no USD rate for currency {}", tx.currency),
            })?;

        let hour_of_day = tx.timestamp.hour() as f64;
        let day_of_week = tx.timestamp.weekday().num_days_from_monday() as f64;

        let from = self.graph.node_id(&tx.from_address);
        let to = self.graph.node_id(&tx.to_address);

        let from_degree = from.map(|n| self.graph.degree(n)).unwrap_or(0) as f64;
        let to_degree = to.map(|n| self.graph.degree(n)).unwrap_or(0) as f64;

        let shared_neighbors = match (from, to) {
            (Some(a), Some(b)) => {
                let peers: HashSet<_> = self.graph.neighbors(a).iter().map(|e| e.peer).collect();
                self.graph
                    .neighbors(b)
                    .iter()
                    .filter(|e| peers.contains(&e.peer))
                    .count() as f64
            }
            _ => 0.0,
        };

        let values = vec![
            amount_usd,
            hour_of_day,
            day_of_week,
            from_degree,
            to_degree,
            shared_neighbors,
            self.risky_exposure(from),
            self.risky_exposure(to),
        ];
        Ok(FeatureVector::from_values(values))
    }

    /// Seed risk of the address itself plus its one-hop neighbors,
    /// clamped to [0, 1].
    fn risky_exposure(&self, node: Option<crate::graph::NodeId>) -> f64 {
        let Some(node) = node else { return 0.0 };
        let own = self.graph.seed_risk(node);
        let neighborhood: f64 = self
            .graph
            .neighbors(node)
            .iter()
            .map(|e| self.graph.seed_risk(e.peer))
            .sum();
        (own + neighborhood).min(1.0)
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_NAMES.len()
    }
}
