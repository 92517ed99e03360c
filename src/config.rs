//! Configuration management for the risk assessment pipeline

use crate::error::{PipelineError, PipelineResult};
use crate::types::CategoryThresholds;
use config::{Config, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub compliance_rules: ComplianceRulesConfig,
    pub risk_scoring: RiskScoringConfig,
    pub ml_models: MlModelsConfig,
    pub graph: GraphConfig,
    pub pipeline: PipelineConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transactions
    pub transaction_subject: String,
    /// Subject for outgoing risk assessments
    pub assessment_subject: String,
    /// Request/reply subject for status lookups
    pub status_subject: String,
}

/// Recognized compliance rules and their parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRulesConfig {
    pub ofac_sanctions: RuleToggle,
    pub high_value_threshold: HighValueRuleConfig,
    pub mixer_detection: RuleToggle,
    pub velocity_check: VelocityRuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleToggle {
    pub enabled: bool,
    /// Contribution to the rule score when triggered, in [0, 1]
    pub risk_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighValueRuleConfig {
    pub enabled: bool,
    pub risk_weight: f64,
    /// Triggers when the USD-converted amount exceeds this value
    pub threshold_usd: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityRuleConfig {
    pub enabled: bool,
    pub risk_weight: f64,
    /// Triggers when the trailing 1-hour count exceeds this value
    pub max_transactions_per_hour: u32,
}

/// Layer weights and category thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoringConfig {
    pub weights: LayerWeights,
    pub thresholds: CategoryThresholds,
}

/// Weights of the three assessment layers; must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LayerWeights {
    pub r3_engine: f64,
    pub arsm: f64,
    pub tad_x: f64,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self {
            r3_engine: 0.3,
            arsm: 0.3,
            tad_x: 0.4,
        }
    }
}

/// ML model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlModelsConfig {
    pub tad_x: TadXConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TadXConfig {
    /// Expected artifact family; the loaded artifact must match
    pub model_type: String,
    /// Path to the versioned model artifact
    pub artifact_path: String,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Age beyond which the artifact is logged as stale
    pub retrain_interval_days: i64,
}

/// Graph traversal bounds and cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Neighborhood hop bound around each endpoint
    pub max_hops: usize,
    /// Node budget for a single traversal; exceeding it degrades to a
    /// sampled computation
    pub node_budget: usize,
    /// Geometric decay applied to propagated risk per hop, in (0, 1)
    pub propagation_decay: f64,
    /// Metric cache entries older than this are recomputed
    pub cache_max_age_secs: u64,
    /// Metric cache entries whose address degree drifted by more than this
    /// are recomputed
    pub cache_degree_delta: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            node_budget: 10_000,
            propagation_decay: 0.5,
            cache_max_age_secs: 300,
            cache_degree_delta: 5,
        }
    }
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent transaction evaluations
    pub workers: usize,
    /// Overall fan-out/join deadline per transaction
    pub overall_timeout_ms: u64,
    /// Attempts for external dependency calls
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay_ms: u64,
    /// Completed executions retained for status lookups
    pub status_capacity: usize,
}

/// Paths to the read-only snapshots maintained by external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub sanctions_path: String,
    pub mixers_path: String,
    pub fx_rates_path: String,
    pub graph_path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> PipelineResult<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to read configuration: {e}")))?;

        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| PipelineError::Config(format!("failed to deserialize configuration: {e}")))?;

        app.validate()?;
        Ok(app)
    }

    /// Reject configurations that violate the scoring invariants.
    pub fn validate(&self) -> PipelineResult<()> {
        let w = &self.risk_scoring.weights;
        for (name, value) in [
            ("r3_engine", w.r3_engine),
            ("arsm", w.arsm),
            ("tad_x", w.tad_x),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "weight {name} = {value} outside [0, 1]"
                )));
            }
        }
        let sum = w.r3_engine + w.arsm + w.tad_x;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PipelineError::Config(format!(
                "layer weights sum to {sum}, expected 1.0"
            )));
        }

        let t = &self.risk_scoring.thresholds;
        if !(t.critical > t.high && t.high > t.medium && t.medium > t.low) {
            return Err(PipelineError::Config(format!(
                "category thresholds must be strictly descending, got critical={} high={} medium={} low={}",
                t.critical, t.high, t.medium, t.low
            )));
        }
        for (name, value) in [
            ("critical", t.critical),
            ("high", t.high),
            ("medium", t.medium),
            ("low", t.low),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "threshold {name} = {value} outside [0, 1]"
                )));
            }
        }

        let rules = &self.compliance_rules;
        for (name, weight) in [
            ("ofac_sanctions", rules.ofac_sanctions.risk_weight),
            ("high_value_threshold", rules.high_value_threshold.risk_weight),
            ("mixer_detection", rules.mixer_detection.risk_weight),
            ("velocity_check", rules.velocity_check.risk_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(PipelineError::Config(format!(
                    "rule {name} risk_weight = {weight} outside [0, 1]"
                )));
            }
        }
        if rules.high_value_threshold.threshold_usd <= Decimal::ZERO {
            return Err(PipelineError::Config(
                "high_value_threshold.threshold_usd must be positive".into(),
            ));
        }

        if self.pipeline.workers == 0 {
            return Err(PipelineError::Config("pipeline.workers must be > 0".into()));
        }
        if self.pipeline.overall_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "pipeline.overall_timeout_ms must be > 0".into(),
            ));
        }

        let g = &self.graph;
        if g.max_hops == 0 || g.node_budget == 0 {
            return Err(PipelineError::Config(
                "graph.max_hops and graph.node_budget must be > 0".into(),
            ));
        }
        if !(g.propagation_decay > 0.0 && g.propagation_decay < 1.0) {
            return Err(PipelineError::Config(format!(
                "graph.propagation_decay = {} outside (0, 1)",
                g.propagation_decay
            )));
        }

        if self.ml_models.tad_x.model_type.trim().is_empty() {
            return Err(PipelineError::Config(
                "ml_models.tad_x.model_type must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Stable fingerprint of the full configuration, pinned into every
    /// assessment for audit reproducibility.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..8])
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                transaction_subject: "risk.transactions".to_string(),
                assessment_subject: "risk.assessments".to_string(),
                status_subject: "risk.status".to_string(),
            },
            compliance_rules: ComplianceRulesConfig {
                ofac_sanctions: RuleToggle {
                    enabled: true,
                    risk_weight: 1.0,
                },
                high_value_threshold: HighValueRuleConfig {
                    enabled: true,
                    risk_weight: 0.3,
                    threshold_usd: Decimal::from(10_000),
                },
                mixer_detection: RuleToggle {
                    enabled: true,
                    risk_weight: 0.8,
                },
                velocity_check: VelocityRuleConfig {
                    enabled: true,
                    risk_weight: 0.4,
                    max_transactions_per_hour: 100,
                },
            },
            risk_scoring: RiskScoringConfig {
                weights: LayerWeights::default(),
                thresholds: CategoryThresholds::default(),
            },
            ml_models: MlModelsConfig {
                tad_x: TadXConfig {
                    model_type: "gradient_boosted_trees".to_string(),
                    artifact_path: "models/tad_x_model.json".to_string(),
                    n_estimators: 100,
                    learning_rate: 0.1,
                    max_depth: 6,
                    retrain_interval_days: 30,
                },
            },
            graph: GraphConfig::default(),
            pipeline: PipelineConfig {
                workers: 4,
                overall_timeout_ms: 1000,
                retry_attempts: 3,
                retry_base_delay_ms: 100,
                status_capacity: 10_000,
            },
            data: DataConfig {
                sanctions_path: "data/sanctions.json".to_string(),
                mixers_path: "data/mixers.json".to_string(),
                fx_rates_path: "data/fx_rates.json".to_string(),
                graph_path: "data/address_graph.json".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

/// Validated configuration plus its version fingerprint. Read-only to all
/// scorers; replaced out-of-band, never mutated mid-request.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config: Arc<AppConfig>,
    version: String,
}

impl ConfigStore {
    pub fn new(config: AppConfig) -> PipelineResult<Self> {
        config.validate()?;
        let version = config.fingerprint();
        Ok(Self {
            config: Arc::new(config),
            version,
        })
    }

    pub fn load() -> PipelineResult<Self> {
        Self::new(AppConfig::load()?)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        Self::new(AppConfig::load_from_path(path)?)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}
