//! End-to-end pipeline tests: fan-out/join, degraded aggregation,
//! regulatory overrides, and audit reproducibility.

use risk_assessment_pipeline::aggregator::Aggregator;
use risk_assessment_pipeline::config::{AppConfig, ConfigStore};
use risk_assessment_pipeline::error::PipelineError;
use risk_assessment_pipeline::features::FeatureExtractor;
use risk_assessment_pipeline::graph::{AddressGraph, GraphRiskScorer};
use risk_assessment_pipeline::model::{demo_artifact, AnomalyScorer};
use risk_assessment_pipeline::retry::BackoffPolicy;
use risk_assessment_pipeline::rules::{
    FxRates, MixerDirectory, RuleContext, RuleEngine, SanctionsList, SanctionsSnapshot,
    UnreachableSanctions, VelocityTracker,
};
use risk_assessment_pipeline::status::ExecutionState;
use risk_assessment_pipeline::types::{RiskCategory, Transaction};
use risk_assessment_pipeline::StatusStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn test_graph() -> AddressGraph {
    AddressGraph::builder()
        .edge("wallet_a", "wallet_b", 2.0)
        .edge("wallet_b", "wallet_c", 1.0)
        .edge("hot_wallet", "wallet_c", 1.5)
        .risky("hot_wallet", 1.0)
        .build()
}

fn fx_rates() -> FxRates {
    let mut rates = HashMap::new();
    rates.insert("USD".to_string(), Decimal::ONE);
    rates.insert("BTC".to_string(), Decimal::from(60_000));
    FxRates::new(rates)
}

fn build_aggregator(
    config: AppConfig,
    sanctions: Arc<dyn SanctionsList>,
    with_model: bool,
) -> Aggregator {
    let store = ConfigStore::new(config).expect("test config must validate");
    let cfg = store.config().clone();

    let graph = Arc::new(test_graph());
    let fx = Arc::new(fx_rates());
    let backoff = BackoffPolicy::new(
        cfg.pipeline.retry_attempts,
        Duration::from_millis(cfg.pipeline.retry_base_delay_ms),
    );

    let rules = Arc::new(RuleEngine::from_config(
        &cfg.compliance_rules,
        RuleContext {
            sanctions,
            mixers: Arc::new(MixerDirectory::new(["mixer_service_001"])),
            fx: fx.clone(),
            velocity: Arc::new(VelocityTracker::new()),
        },
        backoff,
    ));
    let graph_scorer = Arc::new(GraphRiskScorer::new(graph.clone(), cfg.graph.clone()));
    let features = Arc::new(FeatureExtractor::new(graph, fx));
    let anomaly = with_model.then(|| Arc::new(AnomalyScorer::new(demo_artifact()).unwrap()));
    let status = Arc::new(StatusStore::new(cfg.pipeline.status_capacity));

    Aggregator::new(&store, rules, graph_scorer, features, anomaly, status)
}

fn clean_sanctions() -> Arc<dyn SanctionsList> {
    Arc::new(SanctionsSnapshot::empty())
}

fn usd_tx(id: &str, amount: u64) -> Transaction {
    Transaction::new(id, "wallet_a", "wallet_b", Decimal::from(amount), "USD")
}

/// Config tuned for deterministic tests: velocity can never interfere.
fn base_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.compliance_rules.velocity_check.enabled = false;
    config.pipeline.retry_attempts = 1;
    config.pipeline.retry_base_delay_ms = 1;
    config
}

#[tokio::test]
async fn final_score_is_always_in_unit_interval() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), true);

    for (id, from, to, amount) in [
        ("tx_a", "wallet_a", "wallet_b", 100u64),
        ("tx_b", "hot_wallet", "wallet_c", 50_000),
        ("tx_c", "stranger_1", "stranger_2", 1),
    ] {
        let tx = Transaction::new(id, from, to, Decimal::from(amount), "USD");
        let assessment = aggregator.assess(&tx).await.unwrap();
        assert!(
            (0.0..=1.0).contains(&assessment.final_risk_score),
            "score {} out of range",
            assessment.final_risk_score
        );
    }
}

#[tokio::test]
async fn sanctions_hit_forces_critical_override() {
    let sanctions: Arc<dyn SanctionsList> =
        Arc::new(SanctionsSnapshot::new(["wallet_b"]));
    let aggregator = build_aggregator(base_config(), sanctions, true);

    let assessment = aggregator.assess(&usd_tx("tx_ofac", 50)).await.unwrap();

    assert_eq!(assessment.risk_category, RiskCategory::Critical);
    assert!(assessment.override_applied);
    assert!(!assessment.requires_manual_review);
    // The sanctions rule tops the explanation ranking.
    assert_eq!(assessment.explanations[0].name, "ofac_sanctions");
}

#[tokio::test]
async fn sanctions_outage_fails_closed() {
    let sanctions: Arc<dyn SanctionsList> = Arc::new(UnreachableSanctions {
        reason: "connection refused".into(),
    });
    let aggregator = build_aggregator(base_config(), sanctions, true);

    let assessment = aggregator.assess(&usd_tx("tx_unknown", 50)).await.unwrap();

    assert_eq!(assessment.risk_category, RiskCategory::Critical);
    assert!(assessment.override_applied);
    assert!(assessment.requires_manual_review);
}

#[tokio::test]
async fn high_value_rule_contributes_its_weight() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), true);

    let assessment = aggregator.assess(&usd_tx("tx_hv", 15_000)).await.unwrap();

    // Only the high-value rule triggers: r3 = 0.3.
    let r3 = assessment.component_scores.r3_score.unwrap();
    assert!((r3 - 0.3).abs() < 1e-9);
    assert!(!assessment.override_applied);
    assert!(!assessment.degraded);
}

#[tokio::test]
async fn missing_model_degrades_and_renormalizes() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), false);

    let assessment = aggregator.assess(&usd_tx("tx_deg", 15_000)).await.unwrap();

    assert!(assessment.degraded);
    assert!(assessment.component_scores.ml_score.is_none());
    assert!(assessment.model_version.is_none());

    // r3 = 0.3, arsm present: final = (0.3*0.3 + arsm*0.3) / 0.6
    let r3 = assessment.component_scores.r3_score.unwrap();
    let arsm = assessment.component_scores.arsm_score.unwrap();
    let expected = (r3 * 0.3 + arsm * 0.3) / 0.6;
    assert!((assessment.final_risk_score - expected).abs() < 1e-9);
}

#[tokio::test]
async fn repeated_assessment_is_reproducible() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), true);
    let tx = usd_tx("tx_repeat", 15_000);

    let first = aggregator.assess(&tx).await.unwrap();
    let second = aggregator.assess(&tx).await.unwrap();

    assert_eq!(first.final_risk_score, second.final_risk_score);
    assert_eq!(first.risk_category, second.risk_category);
    assert_eq!(first.component_scores.r3_score, second.component_scores.r3_score);
    assert_eq!(first.component_scores.ml_score, second.component_scores.ml_score);
    assert_eq!(first.model_version, second.model_version);
    assert_eq!(first.config_version, second.config_version);

    let names_first: Vec<&String> = first.explanations.iter().map(|e| &e.name).collect();
    let names_second: Vec<&String> = second.explanations.iter().map(|e| &e.name).collect();
    assert_eq!(names_first, names_second);
}

#[tokio::test]
async fn rules_timeout_degrades_without_killing_the_request() {
    let mut config = base_config();
    // Sanctions retries take ~600ms; the join deadline cuts them off.
    config.pipeline.retry_attempts = 3;
    config.pipeline.retry_base_delay_ms = 200;
    config.pipeline.overall_timeout_ms = 50;

    let sanctions: Arc<dyn SanctionsList> = Arc::new(UnreachableSanctions {
        reason: "hanging upstream".into(),
    });
    let aggregator = build_aggregator(config, sanctions, true);

    let assessment = aggregator.assess(&usd_tx("tx_slow", 100)).await.unwrap();

    assert!(assessment.degraded);
    assert!(assessment.requires_manual_review);
    assert!(assessment.component_scores.r3_score.is_none());
    // Graph and ML still produced a blended verdict.
    assert!(assessment.component_scores.arsm_score.is_some());
    assert!(assessment.component_scores.ml_score.is_some());
}

#[tokio::test]
async fn velocity_rule_triggers_exactly_above_the_limit() {
    let mut config = base_config();
    config.compliance_rules.velocity_check.enabled = true;
    config.compliance_rules.velocity_check.max_transactions_per_hour = 2;
    config.compliance_rules.high_value_threshold.enabled = false;
    config.compliance_rules.mixer_detection.enabled = false;
    config.compliance_rules.ofac_sanctions.enabled = false;

    let aggregator = build_aggregator(config, clean_sanctions(), true);

    let mut r3_scores = Vec::new();
    for i in 0..3 {
        let tx = usd_tx(&format!("tx_vel_{i}"), 100);
        let assessment = aggregator.assess(&tx).await.unwrap();
        r3_scores.push(assessment.component_scores.r3_score.unwrap());
    }

    // Counts 1 and 2 stay within the limit; the third exceeds it.
    assert_eq!(r3_scores[0], 0.0);
    assert_eq!(r3_scores[1], 0.0);
    assert!((r3_scores[2] - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn model_attributions_flow_into_explanations() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), true);

    let tx = Transaction::new("tx_ml", "hot_wallet", "wallet_c", Decimal::ONE, "BTC");
    let assessment = aggregator.assess(&tx).await.unwrap();

    assert_eq!(
        assessment.model_version.as_ref().map(|v| v.0.as_str()),
        Some("tadx-demo-001")
    );
    assert!(!assessment.config_version.is_empty());
    // Model-layer entries carry the feature schema names.
    assert!(assessment
        .explanations
        .iter()
        .any(|e| e.name == "amount_usd"));
    // Graph layer reports its propagation signal.
    assert!(assessment
        .explanations
        .iter()
        .any(|e| e.name == "propagated_risk"));
}

#[tokio::test]
async fn status_store_tracks_the_execution() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), true);
    let status = aggregator.status_store();

    assert!(status.get("tx_status").is_none());

    let assessment = aggregator.assess(&usd_tx("tx_status", 100)).await.unwrap();

    match status.get("tx_status") {
        Some(ExecutionState::Complete(stored)) => {
            assert_eq!(stored.transaction_id, assessment.transaction_id);
            assert_eq!(stored.final_risk_score, assessment.final_risk_score);
        }
        other => panic!("expected completed execution, got {other:?}"),
    }

    // The execution reference resolves to the same record.
    match status.resolve(&assessment.execution_ref) {
        Some(ExecutionState::Complete(stored)) => {
            assert_eq!(stored.transaction_id, "tx_status");
        }
        other => panic!("expected resolution by execution ref, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_transactions_are_rejected_before_dispatch() {
    let aggregator = build_aggregator(base_config(), clean_sanctions(), true);
    let status = aggregator.status_store();

    let mut tx = usd_tx("", 100);
    tx.id = String::new();
    let err = aggregator.assess(&tx).await.unwrap_err();
    assert!(matches!(err, PipelineError::InputValidation(_)));

    let mut tx = usd_tx("tx_bad_amount", 100);
    tx.amount = Decimal::from(-5);
    let err = aggregator.assess(&tx).await.unwrap_err();
    assert!(matches!(err, PipelineError::InputValidation(_)));
    // Rejected before dispatch: nothing was recorded.
    assert!(status.get("tx_bad_amount").is_none());
}

#[tokio::test]
async fn category_thresholds_follow_the_weighted_score() {
    // Disable every rule so r3 stays 0 and the blend is predictable.
    let mut config = base_config();
    config.compliance_rules.ofac_sanctions.enabled = false;
    config.compliance_rules.high_value_threshold.enabled = false;
    config.compliance_rules.mixer_detection.enabled = false;

    let aggregator = build_aggregator(config, clean_sanctions(), true);

    let assessment = aggregator
        .assess(&usd_tx("tx_cat", 100))
        .await
        .unwrap();

    let expected = RiskCategory::from_score(
        assessment.final_risk_score,
        &risk_assessment_pipeline::types::CategoryThresholds::default(),
    );
    assert_eq!(assessment.risk_category, expected);
}
