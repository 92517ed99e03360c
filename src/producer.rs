//! NATS message producer for risk assessments

use crate::types::RiskAssessment;
use anyhow::Result;
use async_nats::Client;
use tracing::debug;

/// Producer for publishing risk assessments to NATS
#[derive(Clone)]
pub struct AssessmentProducer {
    client: Client,
    subject: String,
}

impl AssessmentProducer {
    /// Create a new assessment producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a risk assessment
    pub async fn publish(&self, assessment: &RiskAssessment) -> Result<()> {
        let payload = serde_json::to_vec(assessment)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            transaction_id = %assessment.transaction_id,
            final_risk_score = assessment.final_risk_score,
            risk_category = ?assessment.risk_category,
            "published risk assessment"
        );

        Ok(())
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running NATS server
}
