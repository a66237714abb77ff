//! The result publisher: builds the result envelope and emits it on
//! the `results` pipe.

use std::sync::Arc;

use tracing::error;

use crate::check::{Check, CheckResultEnvelope};
use crate::metrics::AgentMetrics;
use crate::transport::{DeliveryPattern, Transport};

pub const RESULTS_PIPE: &str = "results";

/// Serializes and publishes one check result. A publish failure is logged
/// with the full payload and counted; it is never retried.
pub struct ResultPublisher {
    transport: Arc<dyn Transport>,
    metrics: Arc<AgentMetrics>,
    signature: Option<String>,
}

impl ResultPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        metrics: Arc<AgentMetrics>,
        signature: Option<String>,
    ) -> Self {
        Self {
            transport,
            metrics,
            signature,
        }
    }

    pub async fn publish(&self, client: &str, check: Check) {
        let envelope = CheckResultEnvelope {
            client: client.to_string(),
            check,
            signature: self.signature.clone(),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, check = %envelope.check.name, "failed to serialize check result");
                return;
            }
        };

        if let Err(e) = self
            .transport
            .publish(RESULTS_PIPE, DeliveryPattern::Direct, RESULTS_PIPE, payload.clone())
            .await
        {
            self.metrics.record_publish_error(RESULTS_PIPE);
            error!(error = %e, payload = %payload, "failed to publish check result");
        }
    }
}
