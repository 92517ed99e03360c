//! Bounded-staleness cache for per-address graph metrics.
//!
//! Keyed by address. An entry is reused only while the address's local
//! neighborhood is close to what it looked like at compute time (degree
//! drift within a delta) and the entry is younger than the staleness
//! bound. Sharded map, no global lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Metrics computed for a single address's bounded neighborhood.
#[derive(Debug, Clone, Default)]
pub struct NodeMetrics {
    pub degree_centrality: f64,
    pub betweenness: f64,
    pub eigenvector: f64,
    pub community_label: Option<String>,
    pub community_size: usize,
    /// Seed-risk density of the address's community
    pub community_risk: f64,
    /// Spreading-activation mass arriving at the address
    pub activation: f64,
    /// True when the neighborhood was sampled due to budget exhaustion
    pub partial: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    metrics: NodeMetrics,
    degree: usize,
    computed_at: DateTime<Utc>,
}

pub struct MetricsCache {
    entries: DashMap<String, CacheEntry>,
    max_age: Duration,
    degree_delta: usize,
}

impl MetricsCache {
    pub fn new(max_age_secs: u64, degree_delta: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_age: Duration::seconds(max_age_secs as i64),
            degree_delta,
        }
    }

    /// Return the cached metrics and their age in seconds, or evict and
    /// return `None` when the entry is stale or the neighborhood drifted.
    pub fn lookup(
        &self,
        address: &str,
        current_degree: usize,
        now: DateTime<Utc>,
    ) -> Option<(NodeMetrics, u64)> {
        let entry = self.entries.get(address)?;
        let age = now - entry.computed_at;
        let drift = entry.degree.abs_diff(current_degree);
        if age > self.max_age || drift > self.degree_delta {
            drop(entry);
            self.entries.remove(address);
            return None;
        }
        Some((entry.metrics.clone(), age.num_seconds().max(0) as u64))
    }

    pub fn store(
        &self,
        address: &str,
        metrics: NodeMetrics,
        degree: usize,
        computed_at: DateTime<Utc>,
    ) {
        self.entries.insert(
            address.to_string(),
            CacheEntry {
                metrics,
                degree,
                computed_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(activation: f64) -> NodeMetrics {
        NodeMetrics {
            activation,
            ..NodeMetrics::default()
        }
    }

    #[test]
    fn test_fresh_entry_is_reused() {
        let cache = MetricsCache::new(300, 5);
        let now = Utc::now();
        cache.store("addr", metrics(0.4), 10, now);

        let (hit, age) = cache.lookup("addr", 10, now + Duration::seconds(30)).unwrap();
        assert_eq!(hit.activation, 0.4);
        assert_eq!(age, 30);
    }

    #[test]
    fn test_stale_entry_is_evicted() {
        let cache = MetricsCache::new(300, 5);
        let now = Utc::now();
        cache.store("addr", metrics(0.4), 10, now);

        assert!(cache
            .lookup("addr", 10, now + Duration::seconds(301))
            .is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_degree_drift_invalidates() {
        let cache = MetricsCache::new(300, 5);
        let now = Utc::now();
        cache.store("addr", metrics(0.4), 10, now);

        // Within the delta the entry survives.
        assert!(cache.lookup("addr", 14, now).is_some());
        // Beyond it the neighborhood changed too much.
        assert!(cache.lookup("addr", 16, now).is_none());
        assert_eq!(cache.len(), 0);
    }
}
