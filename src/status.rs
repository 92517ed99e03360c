//! Execution status store for assessment lookups.
//!
//! In-memory, capacity-bounded. Persistent result storage is an external
//! collaborator; this store only answers "where is transaction X right
//! now" for recent executions.

use crate::types::RiskAssessment;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lifecycle of one assessment execution.
#[derive(Debug, Clone)]
pub enum ExecutionState {
    Pending,
    Complete(Arc<RiskAssessment>),
    Failed(String),
}

/// Wire shape of a status reply.
#[derive(Debug, Serialize)]
pub struct StatusReply {
    pub transaction_id: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReply {
    pub fn from_state(transaction_id: &str, state: Option<ExecutionState>) -> Self {
        match state {
            Some(ExecutionState::Pending) => Self {
                transaction_id: transaction_id.to_string(),
                state: "pending",
                assessment: None,
                error: None,
            },
            Some(ExecutionState::Complete(assessment)) => Self {
                transaction_id: transaction_id.to_string(),
                state: "complete",
                assessment: Some((*assessment).clone()),
                error: None,
            },
            Some(ExecutionState::Failed(reason)) => Self {
                transaction_id: transaction_id.to_string(),
                state: "failed",
                assessment: None,
                error: Some(reason),
            },
            None => Self {
                transaction_id: transaction_id.to_string(),
                state: "not_found",
                assessment: None,
                error: None,
            },
        }
    }
}

/// Tracks execution states keyed by transaction id, evicting the oldest
/// entries beyond capacity. Completed executions are also reachable by
/// their execution reference.
pub struct StatusStore {
    entries: DashMap<String, ExecutionState>,
    by_ref: DashMap<String, String>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl StatusStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            by_ref: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn mark_pending(&self, transaction_id: &str) {
        if self.entries.insert(transaction_id.to_string(), ExecutionState::Pending).is_none() {
            let mut order = self.order.lock().expect("status order lock");
            order.push_back(transaction_id.to_string());
            while order.len() > self.capacity {
                if let Some(evicted) = order.pop_front() {
                    if let Some((_, ExecutionState::Complete(assessment))) =
                        self.entries.remove(&evicted)
                    {
                        self.by_ref.remove(&assessment.execution_ref);
                    }
                }
            }
        }
    }

    pub fn mark_complete(&self, transaction_id: &str, assessment: Arc<RiskAssessment>) {
        self.by_ref
            .insert(assessment.execution_ref.clone(), transaction_id.to_string());
        self.entries.insert(
            transaction_id.to_string(),
            ExecutionState::Complete(assessment),
        );
    }

    pub fn mark_failed(&self, transaction_id: &str, reason: String) {
        self.entries
            .insert(transaction_id.to_string(), ExecutionState::Failed(reason));
    }

    pub fn get(&self, transaction_id: &str) -> Option<ExecutionState> {
        self.entries.get(transaction_id).map(|e| e.value().clone())
    }

    /// Look up by transaction id, falling back to execution reference.
    pub fn resolve(&self, key: &str) -> Option<ExecutionState> {
        self.get(key).or_else(|| {
            self.by_ref
                .get(key)
                .and_then(|transaction_id| self.get(transaction_id.value()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
