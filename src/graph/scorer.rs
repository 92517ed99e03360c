//! ARSM: graph-based behavioral risk scoring.
//!
//! Traverses the bounded multi-hop neighborhood around both transaction
//! endpoints, computes centrality and community structure on the induced
//! subgraph, and propagates risk from known-risky seed addresses by
//! spreading activation. All iteration orders are fixed, so identical
//! snapshots produce identical results.

use crate::config::GraphConfig;
use crate::error::PipelineResult;
use crate::graph::cache::{MetricsCache, NodeMetrics};
use crate::graph::store::{AddressGraph, NodeId};
use crate::types::Transaction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Blend weights of the graph sub-signals; also used when the feature set
/// is expanded into explanation entries.
pub const W_PROPAGATION: f64 = 0.5;
pub const W_CENTRALITY: f64 = 0.3;
pub const W_COMMUNITY: f64 = 0.2;

/// Betweenness pivot bound on large subgraphs.
const MAX_PIVOTS: usize = 32;
/// Power-iteration rounds for eigenvector centrality.
const EIGENVECTOR_ITERATIONS: usize = 20;
/// Synchronous label-propagation rounds for community detection.
const COMMUNITY_ROUNDS: usize = 5;

/// Whether the feature set came from a full or a sampled computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Full,
    Partial,
}

/// Behavioral features for one transaction's endpoint pair. Produced per
/// request and not persisted beyond the response.
#[derive(Debug, Clone)]
pub struct GraphFeatureSet {
    pub degree_centrality: f64,
    pub betweenness: f64,
    pub eigenvector: f64,
    pub community_label: Option<String>,
    pub community_size: usize,
    pub community_risk: f64,
    /// Summed decayed seed activation arriving at the endpoints, in [0, 1].
    pub propagated_risk: f64,
    pub confidence: Confidence,
    /// Age of the oldest cache entry that contributed, when any did.
    pub cache_age_secs: Option<u64>,
}

impl GraphFeatureSet {
    pub fn centrality_mix(&self) -> f64 {
        (self.degree_centrality + self.betweenness + self.eigenvector) / 3.0
    }
}

/// Scores transactions by their position in the address graph.
pub struct GraphRiskScorer {
    graph: Arc<AddressGraph>,
    cfg: GraphConfig,
    cache: MetricsCache,
}

impl GraphRiskScorer {
    pub fn new(graph: Arc<AddressGraph>, cfg: GraphConfig) -> Self {
        let cache = MetricsCache::new(cfg.cache_max_age_secs, cfg.cache_degree_delta);
        Self { graph, cfg, cache }
    }

    /// Score one transaction. The score blends propagated seed risk,
    /// centrality, and the seed density of the endpoint's community.
    pub fn score(&self, tx: &Transaction) -> PipelineResult<(f64, GraphFeatureSet)> {
        let now = Utc::now();
        let (from, from_age) = self.endpoint_metrics(&tx.from_address, now);
        let (to, to_age) = self.endpoint_metrics(&tx.to_address, now);

        let propagated = (from.activation + to.activation).min(1.0);
        let partial = from.partial || to.partial;

        // Community context of the sending side, falling back to the
        // receiver when the sender is unknown to the graph.
        let (community_label, community_size, community_risk) = if from.community_label.is_some() {
            (from.community_label, from.community_size, from.community_risk)
        } else {
            (to.community_label, to.community_size, to.community_risk)
        };

        let features = GraphFeatureSet {
            degree_centrality: from.degree_centrality.max(to.degree_centrality),
            betweenness: from.betweenness.max(to.betweenness),
            eigenvector: from.eigenvector.max(to.eigenvector),
            community_label,
            community_size,
            community_risk,
            propagated_risk: propagated,
            confidence: if partial {
                Confidence::Partial
            } else {
                Confidence::Full
            },
            cache_age_secs: from_age.into_iter().chain(to_age).max(),
        };

        let score = (W_PROPAGATION * features.propagated_risk
            + W_CENTRALITY * features.centrality_mix()
            + W_COMMUNITY * features.community_risk)
            .clamp(0.0, 1.0);

        debug!(
            transaction_id = %tx.id,
            score = score,
            propagated = features.propagated_risk,
            confidence = ?features.confidence,
            "graph scoring complete"
        );

        Ok((score, features))
    }

    /// Metrics for one endpoint, via the bounded-staleness cache.
    fn endpoint_metrics(&self, address: &str, now: DateTime<Utc>) -> (NodeMetrics, Option<u64>) {
        let Some(node) = self.graph.node_id(address) else {
            return (NodeMetrics::default(), None);
        };
        let degree = self.graph.degree(node);

        if let Some((metrics, age)) = self.cache.lookup(address, degree, now) {
            return (metrics, Some(age));
        }

        let metrics = self.compute_metrics(node);
        self.cache.store(address, metrics.clone(), degree, now);
        (metrics, None)
    }

    fn compute_metrics(&self, node: NodeId) -> NodeMetrics {
        let nb = Neighborhood::collect(&self.graph, node, self.cfg.max_hops, self.cfg.node_budget);
        let n = nb.nodes.len();

        let degree_centrality = if n > 1 {
            nb.adj[nb.origin].len() as f64 / (n - 1) as f64
        } else {
            0.0
        };

        let betweenness = betweenness_of(&nb.adj, nb.origin);
        let eigenvector = eigenvector_of(&nb.adj, nb.origin);

        let labels = communities(&nb.adj);
        let origin_label = labels[nb.origin];
        let members: Vec<usize> = (0..n).filter(|&i| labels[i] == origin_label).collect();
        let community_size = members.len();
        let community_risk = if community_size > 0 {
            (members
                .iter()
                .map(|&i| self.graph.seed_risk(nb.nodes[i]))
                .sum::<f64>()
                / community_size as f64)
                .min(1.0)
        } else {
            0.0
        };
        let representative = members.iter().copied().min().unwrap_or(nb.origin);
        let community_label = Some(self.graph.address(nb.nodes[representative]).to_string());

        let activation = self.activation_at(&nb);

        NodeMetrics {
            degree_centrality,
            betweenness,
            eigenvector,
            community_label,
            community_size,
            community_risk,
            activation,
            partial: nb.truncated,
        }
    }

    /// Spreading activation from seed nodes inside the neighborhood.
    /// Activation decays geometrically per hop and is damped by the edge's
    /// share of the emitting node's volume.
    fn activation_at(&self, nb: &Neighborhood) -> f64 {
        let n = nb.nodes.len();
        let mut act: Vec<f64> = nb
            .nodes
            .iter()
            .map(|&node| self.graph.seed_risk(node))
            .collect();

        for _ in 0..self.cfg.max_hops {
            let mut next = act.clone();
            for i in 0..n {
                if act[i] <= 0.0 {
                    continue;
                }
                let out: f64 = nb.adj[i].iter().map(|&(_, v)| v).sum();
                if out <= 0.0 {
                    continue;
                }
                for &(j, volume) in &nb.adj[i] {
                    let cand = act[i] * self.cfg.propagation_decay * (volume / out).min(1.0);
                    if cand > next[j] {
                        next[j] = cand;
                    }
                }
            }
            act = next;
        }

        act[nb.origin].min(1.0)
    }

    pub fn cached_addresses(&self) -> usize {
        self.cache.len()
    }
}

/// Induced subgraph of the bounded neighborhood around one node.
struct Neighborhood {
    nodes: Vec<NodeId>,
    /// Induced adjacency: position -> [(position, volume)]
    adj: Vec<Vec<(usize, f64)>>,
    origin: usize,
    truncated: bool,
}

impl Neighborhood {
    fn collect(graph: &AddressGraph, start: NodeId, max_hops: usize, budget: usize) -> Self {
        let mut nodes = vec![start];
        let mut pos: HashMap<NodeId, usize> = HashMap::from([(start, 0)]);
        let mut frontier = vec![start];
        let mut truncated = false;

        'hops: for _ in 0..max_hops {
            let mut next = Vec::new();
            for &u in &frontier {
                // Deterministic expansion order under the budget.
                let mut peers: Vec<NodeId> =
                    graph.neighbors(u).iter().map(|e| e.peer).collect();
                peers.sort_unstable();
                for p in peers {
                    if pos.contains_key(&p) {
                        continue;
                    }
                    if nodes.len() >= budget {
                        truncated = true;
                        break 'hops;
                    }
                    pos.insert(p, nodes.len());
                    nodes.push(p);
                    next.push(p);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nodes.len()];
        for (i, &node) in nodes.iter().enumerate() {
            for edge in graph.neighbors(node) {
                if let Some(&j) = pos.get(&edge.peer) {
                    adj[i].push((j, edge.volume));
                }
            }
            adj[i].sort_by(|a, b| a.0.cmp(&b.0));
        }

        Self {
            nodes,
            adj,
            origin: 0,
            truncated,
        }
    }
}

/// Brandes betweenness of `target`, from a bounded pivot set, normalized
/// to [0, 1].
fn betweenness_of(adj: &[Vec<(usize, f64)>], target: usize) -> f64 {
    let n = adj.len();
    if n < 3 {
        return 0.0;
    }
    let pivots = n.min(MAX_PIVOTS);
    let mut total = 0.0;

    for s in 0..pivots {
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut order = Vec::with_capacity(n);
        let mut queue = VecDeque::from([s]);
        sigma[s] = 1.0;
        dist[s] = 0;

        while let Some(u) = queue.pop_front() {
            order.push(u);
            for &(v, _) in &adj[u] {
                if dist[v] < 0 {
                    dist[v] = dist[u] + 1;
                    queue.push_back(v);
                }
                if dist[v] == dist[u] + 1 {
                    sigma[v] += sigma[u];
                    preds[v].push(u);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        for &v in order.iter().rev() {
            for &u in &preds[v] {
                delta[u] += sigma[u] / sigma[v] * (1.0 + delta[v]);
            }
        }
        if target != s {
            total += delta[target];
        }
    }

    let scale = n as f64 / pivots as f64;
    let norm = ((n - 1) * (n - 2)) as f64;
    (total * scale / norm).clamp(0.0, 1.0)
}

/// Eigenvector centrality of `target` by fixed-iteration power method,
/// max-normalized so the dominant node reads 1.
fn eigenvector_of(adj: &[Vec<(usize, f64)>], target: usize) -> f64 {
    let n = adj.len();
    if n < 2 {
        return 0.0;
    }
    let mut x = vec![1.0 / n as f64; n];

    for _ in 0..EIGENVECTOR_ITERATIONS {
        let mut next = vec![0.0f64; n];
        for i in 0..n {
            // Self term keeps the iteration from oscillating on bipartite
            // neighborhoods.
            next[i] = x[i];
            for &(j, _) in &adj[i] {
                next[i] += x[j];
            }
        }
        let max = next.iter().copied().fold(0.0f64, f64::max);
        if max <= f64::EPSILON {
            return 0.0;
        }
        for value in &mut next {
            *value /= max;
        }
        x = next;
    }

    x[target].clamp(0.0, 1.0)
}

/// Deterministic synchronous label propagation. Returns a label per
/// position; ties break toward the smallest label.
fn communities(adj: &[Vec<(usize, f64)>]) -> Vec<usize> {
    let n = adj.len();
    let mut labels: Vec<usize> = (0..n).collect();

    for _ in 0..COMMUNITY_ROUNDS {
        let mut changed = false;
        let mut next = labels.clone();
        for i in 0..n {
            if adj[i].is_empty() {
                continue;
            }
            let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
            for &(j, _) in &adj[i] {
                *counts.entry(labels[j]).or_insert(0) += 1;
            }
            // Most frequent neighbor label, smallest label on ties.
            let best = counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(&label, _)| label)
                .unwrap_or(labels[i]);
            if best != labels[i] {
                next[i] = best;
                changed = true;
            }
        }
        labels = next;
        if !changed {
            break;
        }
    }

    labels
}
