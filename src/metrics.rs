//! In-process metrics for the assessment pipeline.

use crate::types::RiskAssessment;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Counters and latency statistics for pipeline operation.
pub struct PipelineMetrics {
    /// Total assessments produced
    pub assessments: AtomicU64,
    /// Assessments produced in degraded mode
    pub degraded: AtomicU64,
    /// Assessments with a regulatory override applied
    pub overrides: AtomicU64,
    /// Assessments flagged for manual review
    pub manual_review: AtomicU64,
    /// Requests that produced no assessment at all
    pub failures: AtomicU64,
    /// Assessments by risk category
    by_category: RwLock<HashMap<String, u64>>,
    /// Processing times in microseconds
    processing_times: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            assessments: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            overrides: AtomicU64::new(0),
            manual_review: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            by_category: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a completed assessment.
    pub fn record_assessment(&self, processing_time: Duration, assessment: &RiskAssessment) {
        self.assessments.fetch_add(1, Ordering::Relaxed);
        if assessment.degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
        if assessment.override_applied {
            self.overrides.fetch_add(1, Ordering::Relaxed);
        }
        if assessment.requires_manual_review {
            self.manual_review.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut by_category) = self.by_category.write() {
            let key = format!("{:?}", assessment.risk_category).to_lowercase();
            *by_category.entry(key).or_insert(0) += 1;
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only the recent tail for memory efficiency
            if times.len() > 10_000 {
                times.drain(0..5_000);
            }
        }
    }

    /// Record a request that failed outright.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Processing latency statistics over the retained window.
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = self.processing_times.read().unwrap();
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
        }
    }

    /// Assessments per second since startup.
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.assessments.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_by_category(&self) -> HashMap<String, u64> {
        self.by_category.read().unwrap().clone()
    }

    /// Log a summary of pipeline activity.
    pub fn print_summary(&self) {
        let assessments = self.assessments.load(Ordering::Relaxed);
        let degraded = self.degraded.load(Ordering::Relaxed);
        let overrides = self.overrides.load(Ordering::Relaxed);
        let manual = self.manual_review.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let stats = self.get_processing_stats();

        info!(
            assessments = assessments,
            degraded = degraded,
            overrides = overrides,
            manual_review = manual,
            failures = failures,
            throughput = format!("{:.1}/s", self.get_throughput()),
            latency_mean_us = stats.mean_us,
            latency_p95_us = stats.p95_us,
            latency_p99_us = stats.p99_us,
            "pipeline metrics"
        );

        for (category, count) in self.get_by_category() {
            info!(category = %category, count = count, "assessments by category");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Periodically logs the metrics summary.
pub struct MetricsReporter {
    metrics: std::sync::Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
