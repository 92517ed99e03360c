//! R3: deterministic regulatory rule engine.
//!
//! Each enabled rule is a tagged variant with a uniform
//! `evaluate(transaction, context)` capability, registered in a lookup
//! keyed by rule id. Disabled rules are never registered, so they carry no
//! evaluation cost. The sanctions screen runs first and fails closed: an
//! unreachable sanctions source is treated as a hit pending manual review,
//! never silently skipped.

pub mod context;
pub mod velocity;

pub use context::{FxRates, MixerDirectory, SanctionsList, SanctionsSnapshot, UnreachableSanctions};
pub use velocity::VelocityTracker;

use crate::config::ComplianceRulesConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::{with_backoff, BackoffPolicy};
use crate::types::Transaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const RULE_OFAC_SANCTIONS: &str = "ofac_sanctions";
pub const RULE_HIGH_VALUE: &str = "high_value_threshold";
pub const RULE_MIXER_DETECTION: &str = "mixer_detection";
pub const RULE_VELOCITY_CHECK: &str = "velocity_check";

/// Outcome of evaluating a single rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub triggered: bool,
    /// `risk_weight` when triggered, 0 otherwise.
    pub contribution: f64,
}

impl RuleResult {
    fn new(rule_id: &str, triggered: bool, risk_weight: f64) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            triggered,
            contribution: if triggered { risk_weight } else { 0.0 },
        }
    }
}

/// Shared read-only collaborators consulted during rule evaluation. The
/// velocity tracker is the only mutable member and is internally
/// concurrency-safe.
#[derive(Clone)]
pub struct RuleContext {
    pub sanctions: Arc<dyn SanctionsList>,
    pub mixers: Arc<MixerDirectory>,
    pub fx: Arc<FxRates>,
    pub velocity: Arc<VelocityTracker>,
}

/// A compliance rule with its configured parameters.
#[derive(Debug, Clone)]
pub enum ComplianceRule {
    OfacSanctions {
        risk_weight: f64,
    },
    HighValueThreshold {
        risk_weight: f64,
        threshold_usd: Decimal,
    },
    MixerDetection {
        risk_weight: f64,
    },
    VelocityCheck {
        risk_weight: f64,
        max_transactions_per_hour: u32,
    },
}

impl ComplianceRule {
    pub fn id(&self) -> &'static str {
        match self {
            ComplianceRule::OfacSanctions { .. } => RULE_OFAC_SANCTIONS,
            ComplianceRule::HighValueThreshold { .. } => RULE_HIGH_VALUE,
            ComplianceRule::MixerDetection { .. } => RULE_MIXER_DETECTION,
            ComplianceRule::VelocityCheck { .. } => RULE_VELOCITY_CHECK,
        }
    }

    pub fn risk_weight(&self) -> f64 {
        match self {
            ComplianceRule::OfacSanctions { risk_weight }
            | ComplianceRule::HighValueThreshold { risk_weight, .. }
            | ComplianceRule::MixerDetection { risk_weight }
            | ComplianceRule::VelocityCheck { risk_weight, .. } => *risk_weight,
        }
    }

    /// Evaluate the rule against one transaction. Deterministic given the
    /// snapshot and counter state.
    pub fn evaluate(&self, tx: &Transaction, ctx: &RuleContext) -> PipelineResult<RuleResult> {
        match self {
            ComplianceRule::OfacSanctions { risk_weight } => {
                let hit = ctx.sanctions.is_listed(&tx.from_address)?
                    || ctx.sanctions.is_listed(&tx.to_address)?;
                Ok(RuleResult::new(RULE_OFAC_SANCTIONS, hit, *risk_weight))
            }
            ComplianceRule::HighValueThreshold {
                risk_weight,
                threshold_usd,
            } => {
                let usd = ctx.fx.to_usd(tx.amount, &tx.currency).ok_or_else(|| {
                    PipelineError::ExternalDependency {
                        dependency: "fx_rates",
                        reason: format!("no USD rate for currency {}", tx.currency),
                    }
                })?;
                Ok(RuleResult::new(
                    RULE_HIGH_VALUE,
                    usd > *threshold_usd,
                    *risk_weight,
                ))
            }
            ComplianceRule::MixerDetection { risk_weight } => {
                let hit =
                    ctx.mixers.is_mixer(&tx.from_address) || ctx.mixers.is_mixer(&tx.to_address);
                Ok(RuleResult::new(RULE_MIXER_DETECTION, hit, *risk_weight))
            }
            ComplianceRule::VelocityCheck {
                risk_weight,
                max_transactions_per_hour,
            } => {
                let count = ctx.velocity.observe(&tx.from_address, tx.timestamp);
                Ok(RuleResult::new(
                    RULE_VELOCITY_CHECK,
                    count > *max_transactions_per_hour,
                    *risk_weight,
                ))
            }
        }
    }
}

/// Aggregate output of the rule layer for one transaction.
#[derive(Debug, Clone, Default)]
pub struct RuleVerdict {
    pub results: Vec<RuleResult>,
    /// Capped summation of triggered contributions, in [0, 1].
    pub score: f64,
    /// Set on a sanctions hit, or when the sanctions source was
    /// unreachable (fail-closed). Forces the final category downstream.
    pub override_triggered: bool,
    /// Set when any rule could not be evaluated reliably.
    pub requires_manual_review: bool,
}

/// Evaluates the registered compliance rules against transactions.
pub struct RuleEngine {
    registry: BTreeMap<&'static str, ComplianceRule>,
    ctx: RuleContext,
    backoff: BackoffPolicy,
}

impl RuleEngine {
    pub fn new(rules: Vec<ComplianceRule>, ctx: RuleContext, backoff: BackoffPolicy) -> Self {
        let registry = rules.into_iter().map(|r| (r.id(), r)).collect();
        Self {
            registry,
            ctx,
            backoff,
        }
    }

    /// Build the registry from configuration. Disabled rules are skipped
    /// entirely.
    pub fn from_config(
        cfg: &ComplianceRulesConfig,
        ctx: RuleContext,
        backoff: BackoffPolicy,
    ) -> Self {
        let mut rules = Vec::new();
        if cfg.ofac_sanctions.enabled {
            rules.push(ComplianceRule::OfacSanctions {
                risk_weight: cfg.ofac_sanctions.risk_weight,
            });
        }
        if cfg.high_value_threshold.enabled {
            rules.push(ComplianceRule::HighValueThreshold {
                risk_weight: cfg.high_value_threshold.risk_weight,
                threshold_usd: cfg.high_value_threshold.threshold_usd,
            });
        }
        if cfg.mixer_detection.enabled {
            rules.push(ComplianceRule::MixerDetection {
                risk_weight: cfg.mixer_detection.risk_weight,
            });
        }
        if cfg.velocity_check.enabled {
            rules.push(ComplianceRule::VelocityCheck {
                risk_weight: cfg.velocity_check.risk_weight,
                max_transactions_per_hour: cfg.velocity_check.max_transactions_per_hour,
            });
        }
        Self::new(rules, ctx, backoff)
    }

    pub fn rule_count(&self) -> usize {
        self.registry.len()
    }

    /// Evaluate all registered rules. The engine itself never fails: rule
    /// faults are folded into the verdict.
    pub async fn evaluate(&self, tx: &Transaction) -> RuleVerdict {
        let mut verdict = RuleVerdict::default();

        // Sanctions first: the one rule that must produce a verdict even
        // when everything else is on fire.
        if let Some(rule) = self.registry.get(RULE_OFAC_SANCTIONS) {
            let outcome = with_backoff(self.backoff, "sanctions_screen", || {
                let result = rule.evaluate(tx, &self.ctx);
                async move { result }
            })
            .await;

            match outcome {
                Ok(result) => {
                    if result.triggered {
                        verdict.override_triggered = true;
                        debug!(transaction_id = %tx.id, "sanctions hit");
                    }
                    verdict.results.push(result);
                }
                Err(e) => {
                    // Fail closed: unknown is treated as a hit and routed
                    // to a human.
                    warn!(
                        transaction_id = %tx.id,
                        error = %e,
                        "sanctions source unreachable, failing closed"
                    );
                    verdict
                        .results
                        .push(RuleResult::new(RULE_OFAC_SANCTIONS, true, rule.risk_weight()));
                    verdict.override_triggered = true;
                    verdict.requires_manual_review = true;
                }
            }
        }

        for (id, rule) in &self.registry {
            if *id == RULE_OFAC_SANCTIONS {
                continue;
            }
            match rule.evaluate(tx, &self.ctx) {
                Ok(result) => verdict.results.push(result),
                Err(e) => {
                    warn!(transaction_id = %tx.id, rule = *id, error = %e, "rule evaluation failed");
                    verdict.requires_manual_review = true;
                }
            }
        }

        let total: f64 = verdict
            .results
            .iter()
            .filter(|r| r.triggered)
            .map(|r| r.contribution)
            .sum();
        verdict.score = total.min(1.0);
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx_with(sanctions: Arc<dyn SanctionsList>) -> RuleContext {
        let mut rates = HashMap::new();
        rates.insert("USD".to_string(), Decimal::ONE);
        rates.insert("BTC".to_string(), Decimal::from(60_000));
        RuleContext {
            sanctions,
            mixers: Arc::new(MixerDirectory::new(["tornado_pool"])),
            fx: Arc::new(FxRates::new(rates)),
            velocity: Arc::new(VelocityTracker::new()),
        }
    }

    fn engine(ctx: RuleContext) -> RuleEngine {
        let cfg = crate::config::AppConfig::default().compliance_rules;
        RuleEngine::from_config(&cfg, ctx, BackoffPolicy::new(2, std::time::Duration::from_millis(1)))
    }

    fn tx(amount_usd: u64) -> Transaction {
        Transaction::new(
            "tx_1",
            "wallet_from",
            "wallet_to",
            Decimal::from(amount_usd),
            "USD",
        )
    }

    #[tokio::test]
    async fn test_clean_transaction_scores_zero() {
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::empty())));
        let verdict = engine.evaluate(&tx(500)).await;

        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.override_triggered);
        assert!(!verdict.requires_manual_review);
        assert_eq!(verdict.results.len(), 4);
        assert!(verdict.results.iter().all(|r| !r.triggered));
    }

    #[tokio::test]
    async fn test_high_value_triggers_alone() {
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::empty())));
        let verdict = engine.evaluate(&tx(15_000)).await;

        assert!((verdict.score - 0.3).abs() < 1e-9);
        let hv = verdict
            .results
            .iter()
            .find(|r| r.rule_id == RULE_HIGH_VALUE)
            .unwrap();
        assert!(hv.triggered);
        assert_eq!(hv.contribution, 0.3);
        assert!(!verdict.override_triggered);
    }

    #[tokio::test]
    async fn test_high_value_boundary_is_exclusive() {
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::empty())));
        // Exactly at the threshold does not trigger.
        let verdict = engine.evaluate(&tx(10_000)).await;
        assert_eq!(verdict.score, 0.0);
    }

    #[tokio::test]
    async fn test_sanctions_hit_sets_override() {
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::new(["wallet_to"]))));
        let verdict = engine.evaluate(&tx(500)).await;

        assert!(verdict.override_triggered);
        assert!(!verdict.requires_manual_review);
        assert_eq!(verdict.score, 1.0);
    }

    #[tokio::test]
    async fn test_sanctions_unreachable_fails_closed() {
        let engine = engine(ctx_with(Arc::new(UnreachableSanctions {
            reason: "connection refused".into(),
        })));
        let verdict = engine.evaluate(&tx(500)).await;

        assert!(verdict.override_triggered);
        assert!(verdict.requires_manual_review);
        let ofac = verdict
            .results
            .iter()
            .find(|r| r.rule_id == RULE_OFAC_SANCTIONS)
            .unwrap();
        assert!(ofac.triggered);
        assert_eq!(ofac.contribution, 1.0);
    }

    #[tokio::test]
    async fn test_mixer_detection() {
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::empty())));
        let mut transaction = tx(500);
        transaction.to_address = "tornado_pool".into();
        let verdict = engine.evaluate(&transaction).await;

        assert!((verdict.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rule_score_is_capped() {
        // Sanctioned + mixer + high value: 1.0 + 0.8 + 0.3 caps at 1.0.
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::new(["wallet_from"]))));
        let mut transaction = tx(15_000);
        transaction.to_address = "tornado_pool".into();
        let verdict = engine.evaluate(&transaction).await;

        assert_eq!(verdict.score, 1.0);
        assert!(verdict.override_triggered);
    }

    #[tokio::test]
    async fn test_velocity_triggers_only_above_max() {
        let cfg = {
            let mut c = crate::config::AppConfig::default().compliance_rules;
            c.velocity_check.max_transactions_per_hour = 3;
            c.ofac_sanctions.enabled = false;
            c.high_value_threshold.enabled = false;
            c.mixer_detection.enabled = false;
            c
        };
        let ctx = ctx_with(Arc::new(SanctionsSnapshot::empty()));
        let engine = RuleEngine::from_config(
            &cfg,
            ctx,
            BackoffPolicy::new(1, std::time::Duration::from_millis(1)),
        );

        // Observations 1..=3 stay below or at the limit.
        for _ in 0..3 {
            let verdict = engine.evaluate(&tx(100)).await;
            assert_eq!(verdict.score, 0.0);
        }
        // The fourth in the same hour exceeds it.
        let verdict = engine.evaluate(&tx(100)).await;
        assert!((verdict.score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disabled_rules_are_not_registered() {
        let mut cfg = crate::config::AppConfig::default().compliance_rules;
        cfg.mixer_detection.enabled = false;
        cfg.velocity_check.enabled = false;
        let engine = RuleEngine::from_config(
            &cfg,
            ctx_with(Arc::new(SanctionsSnapshot::empty())),
            BackoffPolicy::default(),
        );
        assert_eq!(engine.rule_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_currency_flags_manual_review() {
        let engine = engine(ctx_with(Arc::new(SanctionsSnapshot::empty())));
        let mut transaction = tx(500);
        transaction.currency = "XMR".into();
        let verdict = engine.evaluate(&transaction).await;

        // High-value rule could not run; everything else still did.
        assert!(verdict.requires_manual_review);
        assert_eq!(verdict.results.len(), 3);
    }
}
