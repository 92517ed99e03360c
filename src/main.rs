//! Risk Assessment Pipeline - Main Entry Point
//!
//! Consumes transactions from NATS, fans each one out to the rule, graph
//! and anomaly scorers, and publishes the aggregated risk assessment.
//! Status lookups are answered over request/reply.

use anyhow::Result;
use futures::StreamExt;
use risk_assessment_pipeline::{
    aggregator::Aggregator,
    config::ConfigStore,
    consumer::TransactionConsumer,
    features::FeatureExtractor,
    graph::{AddressGraph, GraphRiskScorer},
    metrics::{MetricsReporter, PipelineMetrics},
    model::{AnomalyScorer, ModelArtifact},
    producer::AssessmentProducer,
    retry::{with_backoff, BackoffPolicy},
    rules::{
        FxRates, MixerDirectory, RuleContext, RuleEngine, SanctionsList, SanctionsSnapshot,
        UnreachableSanctions, VelocityTracker,
    },
    status::{StatusReply, StatusStore},
    Transaction,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("risk_assessment_pipeline=info".parse()?),
        )
        .init();

    info!("Starting Risk Assessment Pipeline");

    // Load configuration
    let config_store = ConfigStore::load()?;
    let config = config_store.config().clone();
    info!(config_version = %config_store.version(), "Configuration loaded and validated");

    let backoff = BackoffPolicy::new(
        config.pipeline.retry_attempts,
        Duration::from_millis(config.pipeline.retry_base_delay_ms),
    );

    // Initialize metrics
    let metrics = Arc::new(PipelineMetrics::new());

    // Sanctions snapshot. If it cannot be loaded the pipeline fails
    // closed: every screen errors and every assessment goes to manual
    // review, rather than silently passing sanctioned counterparties.
    let sanctions: Arc<dyn SanctionsList> = {
        let path = config.data.sanctions_path.clone();
        match with_backoff(backoff, "sanctions_snapshot", || {
            let result = SanctionsSnapshot::load(&path);
            async move { result }
        })
        .await
        {
            Ok(snapshot) => {
                info!(entries = snapshot.len(), "Sanctions snapshot loaded");
                Arc::new(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Sanctions snapshot unavailable, failing closed");
                Arc::new(UnreachableSanctions {
                    reason: e.to_string(),
                })
            }
        }
    };

    let mixers = match MixerDirectory::load(&config.data.mixers_path) {
        Ok(directory) => {
            info!(entries = directory.len(), "Mixer directory loaded");
            Arc::new(directory)
        }
        Err(e) => {
            warn!(error = %e, "Mixer directory unavailable, mixer detection will not trigger");
            Arc::new(MixerDirectory::empty())
        }
    };

    let fx = match FxRates::load(&config.data.fx_rates_path) {
        Ok(rates) => {
            info!(currencies = rates.currencies(), "FX rate snapshot loaded");
            Arc::new(rates)
        }
        Err(e) => {
            warn!(error = %e, "FX rate snapshot unavailable, falling back to stablecoin rates");
            Arc::new(FxRates::default())
        }
    };

    let graph = {
        let path = config.data.graph_path.clone();
        match with_backoff(backoff, "graph_snapshot", || {
            let result = AddressGraph::load(&path);
            async move { result }
        })
        .await
        {
            Ok(snapshot) => {
                info!(
                    nodes = snapshot.node_count(),
                    seeds = snapshot.seed_count(),
                    "Address graph snapshot loaded"
                );
                Arc::new(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Graph snapshot unavailable, graph scoring degrades to zero");
                Arc::new(AddressGraph::builder().build())
            }
        }
    };

    // Model artifact. A missing artifact is not fatal: assessments run
    // degraded without the ML layer until a retrained artifact lands.
    let anomaly = match ModelArtifact::load_for_config(&config.ml_models.tad_x, backoff).await {
        Ok(artifact) => match AnomalyScorer::new(artifact) {
            Ok(scorer) => {
                info!(model_version = %scorer.model_version(), "Anomaly scorer initialized");
                Some(Arc::new(scorer))
            }
            Err(e) => {
                warn!(error = %e, "Model artifact rejected, running without ML layer");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Model artifact unavailable, running without ML layer");
            None
        }
    };

    // Assemble the pipeline
    let velocity = Arc::new(VelocityTracker::new());
    let rule_engine = Arc::new(RuleEngine::from_config(
        &config.compliance_rules,
        RuleContext {
            sanctions,
            mixers,
            fx: fx.clone(),
            velocity,
        },
        backoff,
    ));
    info!(rules = rule_engine.rule_count(), "Rule engine initialized");

    let graph_scorer = Arc::new(GraphRiskScorer::new(graph.clone(), config.graph.clone()));
    let feature_extractor = Arc::new(FeatureExtractor::new(graph, fx));
    let status_store = Arc::new(StatusStore::new(config.pipeline.status_capacity));

    let aggregator = Arc::new(Aggregator::new(
        &config_store,
        rule_engine,
        graph_scorer,
        feature_extractor,
        anomaly,
        status_store.clone(),
    ));

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let producer = Arc::new(AssessmentProducer::new(
        client.clone(),
        &config.nats.assessment_subject,
    ));

    // Status request/reply responder
    {
        let store = status_store.clone();
        let status_client = client.clone();
        let mut status_sub = client.subscribe(config.nats.status_subject.clone()).await?;
        info!(subject = %config.nats.status_subject, "Answering status queries");
        tokio::spawn(async move {
            while let Some(message) = status_sub.next().await {
                let Some(reply_to) = message.reply else {
                    continue;
                };
                let id = String::from_utf8_lossy(&message.payload).trim().to_string();
                let reply = StatusReply::from_state(&id, store.resolve(&id));
                match serde_json::to_vec(&reply) {
                    Ok(payload) => {
                        if let Err(e) = status_client.publish(reply_to, payload.into()).await {
                            warn!(error = %e, "Failed to publish status reply");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize status reply"),
                }
            }
        });
    }

    // Start metrics reporter (logs a summary every 30 seconds)
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let reporter = MetricsReporter::new(metrics_clone, 30);
        reporter.start().await;
    });

    let num_workers = config.pipeline.workers;
    info!(
        workers = num_workers,
        subject = %config.nats.transaction_subject,
        "Starting transaction processing loop"
    );

    // Semaphore to limit concurrent assessments
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let aggregator = aggregator.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            match serde_json::from_slice::<Transaction>(&message.payload) {
                Ok(transaction) => {
                    let tx_id = transaction.id.clone();
                    match aggregator.assess(&transaction).await {
                        Ok(assessment) => {
                            metrics.record_assessment(start_time.elapsed(), &assessment);
                            if let Err(e) = producer.publish(&assessment).await {
                                error!(
                                    transaction_id = %tx_id,
                                    error = %e,
                                    "Failed to publish assessment"
                                );
                            }
                        }
                        Err(e) => {
                            metrics.record_failure();
                            warn!(
                                transaction_id = %tx_id,
                                error = %e,
                                "Assessment failed"
                            );
                        }
                    }
                }
                Err(e) => {
                    metrics.record_failure();
                    warn!(error = %e, "Failed to deserialize transaction");
                }
            }

            drop(permit);
        });
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}
