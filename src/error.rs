//! Error taxonomy for the risk assessment pipeline.

use thiserror::Error;

/// Errors raised by the pipeline and its components.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration. Fatal at startup; a bad config is never
    /// allowed to serve traffic.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed transaction, rejected before dispatch.
    #[error("invalid transaction: {0}")]
    InputValidation(String),

    /// A component did not finish within the overall assessment deadline.
    #[error("component {component} timed out after {timeout_ms}ms")]
    ComponentTimeout {
        component: &'static str,
        timeout_ms: u64,
    },

    /// Internal scorer fault. Caught by the aggregator and converted to a
    /// missing score, never propagated to the caller.
    #[error("component {component} failed: {reason}")]
    ComponentFailure {
        component: &'static str,
        reason: String,
    },

    /// An external collaborator (sanctions list, graph snapshot, model
    /// artifact, FX rates) is unreachable.
    #[error("external dependency {dependency} unavailable: {reason}")]
    ExternalDependency {
        dependency: &'static str,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
