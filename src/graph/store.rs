//! Flat indexed address graph snapshot.
//!
//! Nodes and edges live in integer-indexed tables (no pointer structures),
//! so concurrent readers traverse without locks and every operation is
//! bounded by construction. The snapshot is populated by an external
//! collaborator and read-only during evaluation.

use crate::error::{PipelineError, PipelineResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub type NodeId = usize;

/// Adjacency entry. `volume` is the cumulative transferred amount on the
/// edge, used to weight risk propagation.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub peer: NodeId,
    pub volume: f64,
}

/// Read-only transaction graph around addresses.
pub struct AddressGraph {
    addresses: Vec<String>,
    index: HashMap<String, NodeId>,
    adjacency: Vec<Vec<Edge>>,
    seed_risk: HashMap<NodeId, f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotEdge {
    from: String,
    to: String,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct SnapshotSeed {
    address: String,
    risk: f64,
}

#[derive(Debug, Deserialize)]
struct GraphSnapshotFile {
    edges: Vec<SnapshotEdge>,
    #[serde(default)]
    risk_seeds: Vec<SnapshotSeed>,
}

impl AddressGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Load a snapshot from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::ExternalDependency {
                dependency: "graph_store",
                reason: e.to_string(),
            }
        })?;
        let file: GraphSnapshotFile =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ExternalDependency {
                dependency: "graph_store",
                reason: e.to_string(),
            })?;

        let mut builder = GraphBuilder::default();
        for edge in file.edges {
            builder = builder.edge(&edge.from, &edge.to, edge.volume);
        }
        for seed in file.risk_seeds {
            builder = builder.risky(&seed.address, seed.risk);
        }
        Ok(builder.build())
    }

    pub fn node_id(&self, address: &str) -> Option<NodeId> {
        self.index.get(address).copied()
    }

    pub fn address(&self, node: NodeId) -> &str {
        &self.addresses[node]
    }

    pub fn neighbors(&self, node: NodeId) -> &[Edge] {
        &self.adjacency[node]
    }

    pub fn degree(&self, node: NodeId) -> usize {
        self.adjacency[node].len()
    }

    /// Seed risk of a known-risky address, 0 for everything else.
    pub fn seed_risk(&self, node: NodeId) -> f64 {
        self.seed_risk.get(&node).copied().unwrap_or(0.0)
    }

    pub fn node_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn seed_count(&self) -> usize {
        self.seed_risk.len()
    }
}

/// Incremental snapshot construction, used by the loader and by tests.
#[derive(Default)]
pub struct GraphBuilder {
    addresses: Vec<String>,
    index: HashMap<String, NodeId>,
    adjacency: Vec<Vec<Edge>>,
    seed_risk: HashMap<NodeId, f64>,
}

impl GraphBuilder {
    fn intern(&mut self, address: &str) -> NodeId {
        if let Some(&id) = self.index.get(address) {
            return id;
        }
        let id = self.addresses.len();
        self.addresses.push(address.to_string());
        self.index.insert(address.to_string(), id);
        self.adjacency.push(Vec::new());
        id
    }

    /// Record an undirected transfer edge between two addresses.
    pub fn edge(mut self, from: &str, to: &str, volume: f64) -> Self {
        let a = self.intern(from);
        let b = self.intern(to);
        self.adjacency[a].push(Edge { peer: b, volume });
        self.adjacency[b].push(Edge { peer: a, volume });
        self
    }

    /// Mark an address as a known-risky seed with the given risk in [0, 1].
    pub fn risky(mut self, address: &str, risk: f64) -> Self {
        let id = self.intern(address);
        self.seed_risk.insert(id, risk.clamp(0.0, 1.0));
        self
    }

    pub fn build(mut self) -> AddressGraph {
        // Deterministic adjacency order regardless of insertion order.
        for edges in &mut self.adjacency {
            edges.sort_by(|a, b| a.peer.cmp(&b.peer));
        }
        AddressGraph {
            addresses: self.addresses,
            index: self.index,
            adjacency: self.adjacency,
            seed_risk: self.seed_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_interns_addresses_once() {
        let graph = AddressGraph::builder()
            .edge("a", "b", 1.0)
            .edge("a", "c", 2.0)
            .edge("b", "c", 0.5)
            .build();

        assert_eq!(graph.node_count(), 3);
        let a = graph.node_id("a").unwrap();
        assert_eq!(graph.degree(a), 2);
        assert!(graph.node_id("missing").is_none());
    }

    #[test]
    fn test_edges_are_undirected() {
        let graph = AddressGraph::builder().edge("x", "y", 3.0).build();
        let x = graph.node_id("x").unwrap();
        let y = graph.node_id("y").unwrap();

        assert_eq!(graph.neighbors(x)[0].peer, y);
        assert_eq!(graph.neighbors(y)[0].peer, x);
        assert_eq!(graph.neighbors(y)[0].volume, 3.0);
    }

    #[test]
    fn test_seed_risk_is_clamped() {
        let graph = AddressGraph::builder().risky("hot", 1.7).build();
        let hot = graph.node_id("hot").unwrap();
        assert_eq!(graph.seed_risk(hot), 1.0);
        assert_eq!(graph.seed_count(), 1);
    }

    #[test]
    fn test_load_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(
            &path,
            r#"{"edges":[{"from":"a","to":"b","volume":1.5}],"risk_seeds":[{"address":"a","risk":0.7}]}"#,
        )
        .unwrap();

        let graph = AddressGraph::load(&path).unwrap();
        assert_eq!(graph.node_count(), 2);
        let a = graph.node_id("a").unwrap();
        assert_eq!(graph.seed_risk(a), 0.7);
        assert_eq!(graph.neighbors(a)[0].volume, 1.5);
    }
}
