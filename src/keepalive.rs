//! The keepalive engine: announces the client to the fabric on a
//! fixed cadence.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::metrics::AgentMetrics;
use crate::redact::Redactor;
use crate::settings::Settings;
use crate::transport::{DeliveryPattern, Transport};

pub const KEEPALIVES_PIPE: &str = "keepalives";
pub const KEEPALIVE_INTERVAL_SECS: u64 = 20;

/// Builds and publishes keepalive payloads. Scheduling (once immediately,
/// then every [`KEEPALIVE_INTERVAL_SECS`]) is the agent core's job — this
/// type only knows how to produce and send one payload.
pub struct KeepaliveEngine {
    transport: Arc<dyn Transport>,
    redactor: Arc<dyn Redactor>,
    metrics: Arc<AgentMetrics>,
    client_name: String,
    client_section: Value,
    sensitive_keys: Vec<String>,
    version: String,
}

impl KeepaliveEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        redactor: Arc<dyn Redactor>,
        metrics: Arc<AgentMetrics>,
        settings: &Settings,
        version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            redactor,
            metrics,
            client_name: settings.client.name.clone(),
            client_section: settings.client_tree().clone(),
            sensitive_keys: settings.client.redact.clone(),
            version: version.into(),
        }
    }

    /// The full client section merged with `{version, timestamp}`, then
    /// redacted.
    fn build_payload(&self, now_epoch: i64) -> Value {
        let mut raw = self.client_section.clone();
        if let Value::Object(map) = &mut raw {
            map.insert("version".to_string(), json!(self.version));
            map.insert("timestamp".to_string(), json!(now_epoch));
        }
        self.redactor.redact(&raw, &self.sensitive_keys)
    }

    /// Build and publish one keepalive payload. `now_epoch` is passed in
    /// rather than read from the clock so callers control the timestamp.
    pub async fn publish_once(&self, now_epoch: i64) {
        let payload = self.build_payload(now_epoch);
        let serialized = payload.to_string();
        if self
            .transport
            .publish(
                KEEPALIVES_PIPE,
                DeliveryPattern::Direct,
                KEEPALIVES_PIPE,
                serialized,
            )
            .await
            .is_err()
        {
            self.metrics.record_publish_error(KEEPALIVES_PIPE);
            return;
        }
        self.metrics.record_keepalive(&self.client_name);
    }
}
