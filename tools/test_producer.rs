//! Test Transaction Producer
//!
//! Generates and publishes test transactions to NATS for pipeline testing.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Transaction structure matching the pipeline's expected format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Transaction {
    id: String,
    from_address: String,
    to_address: String,
    amount: f64,
    currency: String,
    timestamp: chrono::DateTime<Utc>,
}

/// Transaction generator for testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: u64,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
        }
    }

    /// Generate an ordinary low-risk transaction
    fn generate_ordinary(&mut self) -> Transaction {
        self.transaction_counter += 1;

        Transaction {
            id: format!("tx_{:012}", self.transaction_counter),
            from_address: format!("wallet_{:06}", self.rng.gen_range(1..5000)),
            to_address: format!("wallet_{:06}", self.rng.gen_range(1..5000)),
            amount: self.rng.gen_range(0.001..0.05),
            currency: self.random_choice(&["BTC", "ETH", "USDT"]).to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Generate a suspicious transaction: high value, or touching a
    /// sanctioned/mixer address from the sample snapshots.
    fn generate_suspicious(&mut self) -> Transaction {
        self.transaction_counter += 1;

        let to_address = self
            .random_choice(&[
                "sanctioned_wallet_001",
                "mixer_service_001",
                "wallet_000042",
            ])
            .to_string();

        Transaction {
            id: format!("tx_{:012}", self.transaction_counter),
            from_address: format!("wallet_{:06}", self.rng.gen_range(1..5000)),
            to_address,
            amount: self.rng.gen_range(0.5..5.0), // high value in BTC terms
            currency: "BTC".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("risk.transactions");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let suspicious_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        suspicious_rate = suspicious_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, suspicious_rate, delay_ms).await;
        }
    };

    // Generate and publish transactions
    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    info!("Starting to publish {} transactions...", count);

    let mut ordinary_count = 0;
    let mut suspicious_count = 0;

    for i in 0..count {
        let transaction = if rng.gen_bool(suspicious_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            ordinary_count += 1;
            generator.generate_ordinary()
        };

        let payload = serde_json::to_vec(&transaction)?;

        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} transactions ({} ordinary, {} suspicious)",
                i + 1,
                count,
                ordinary_count,
                suspicious_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Published {} transactions ({} ordinary, {} suspicious)",
        count, ordinary_count, suspicious_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, suspicious_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let transaction = if rng.gen_bool(suspicious_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_ordinary()
        };

        let json = serde_json::to_string_pretty(&transaction)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample transaction {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
