//! Merges heterogeneous explanations into one ranked, auditable list.
//!
//! Entries are ordered by absolute contribution magnitude; ties break by
//! source layer (rules before graph before model), then by name. Ordering
//! uses total float comparison, so identical inputs always produce the
//! identical list.

use crate::graph::{GraphFeatureSet, W_CENTRALITY, W_COMMUNITY, W_PROPAGATION};
use crate::model::Attribution;
use crate::rules::RuleResult;
use crate::types::{Explanation, ExplanationSource, Impact};

/// Combine the three explanation sources into a ranked list.
pub fn combine(
    rule_results: &[RuleResult],
    graph_features: Option<&GraphFeatureSet>,
    ml_attributions: Option<&[Attribution]>,
) -> Vec<Explanation> {
    let mut entries = Vec::new();

    for result in rule_results.iter().filter(|r| r.triggered) {
        entries.push(Explanation {
            source: ExplanationSource::Rule,
            name: result.rule_id.clone(),
            value: result.contribution,
            importance: result.contribution,
            impact: Impact::of(result.contribution),
        });
    }

    if let Some(features) = graph_features {
        let graph_entries = [
            (
                "propagated_risk",
                features.propagated_risk,
                W_PROPAGATION * features.propagated_risk,
            ),
            (
                "centrality",
                features.centrality_mix(),
                W_CENTRALITY * features.centrality_mix(),
            ),
            (
                "community_risk",
                features.community_risk,
                W_COMMUNITY * features.community_risk,
            ),
        ];
        for (name, value, importance) in graph_entries {
            entries.push(Explanation {
                source: ExplanationSource::Graph,
                name: name.to_string(),
                value,
                importance,
                impact: Impact::of(importance),
            });
        }
    }

    if let Some(attributions) = ml_attributions {
        for attribution in attributions {
            entries.push(Explanation {
                source: ExplanationSource::Model,
                name: attribution.feature.clone(),
                value: attribution.value,
                importance: attribution.importance,
                impact: attribution.impact,
            });
        }
    }

    entries.sort_by(|a, b| {
        b.importance
            .abs()
            .total_cmp(&a.importance.abs())
            .then(a.source.cmp(&b.source))
            .then(a.name.cmp(&b.name))
    });
    entries
}
