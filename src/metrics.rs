//! Agent-wide Prometheus metrics: one registry, a handful of named vectors,
//! gathered into an OpenMetrics text report for a tiny HTTP server.

use std::sync::Arc;

use prometheus::{
    opts, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};

use crate::error::{AgentError, Result};

const NAMESPACE: &str = "nodewatch";

macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", NAMESPACE, $name)
    };
}

/// The agent's metrics, held behind an `Arc` so both the event loop and the
/// HTTP server task can read/write it concurrently.
pub struct AgentMetrics {
    registry: Registry,
    checks_dispatched_total: IntCounterVec,
    checks_in_flight: IntGaugeVec,
    keepalives_sent_total: IntCounterVec,
    publish_errors_total: IntCounterVec,
    socket_payloads_total: IntCounterVec,
}

impl AgentMetrics {
    pub fn new(client: &str) -> Result<Self> {
        let registry = Registry::new();
        let const_labels = prometheus::labels! { "client".to_string() => client.to_string() };

        let checks_dispatched_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("checks_dispatched_total"),
                "Number of check executions dispatched",
                const_labels.clone()
            ),
            &["check"],
            registry
        )
        .map_err(AgentError::Metrics)?;

        let checks_in_flight = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("checks_in_flight"),
                "Number of command checks currently executing",
                const_labels.clone()
            ),
            &["check"],
            registry
        )
        .map_err(AgentError::Metrics)?;

        let keepalives_sent_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("keepalives_sent_total"),
                "Number of keepalives published",
                const_labels.clone()
            ),
            &["client"],
            registry
        )
        .map_err(AgentError::Metrics)?;

        let publish_errors_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("publish_errors_total"),
                "Number of transport publish failures",
                const_labels.clone()
            ),
            &["pipe"],
            registry
        )
        .map_err(AgentError::Metrics)?;

        let socket_payloads_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("socket_payloads_total"),
                "Number of result payloads accepted on local sockets",
                const_labels
            ),
            &["transport"],
            registry
        )
        .map_err(AgentError::Metrics)?;

        Ok(Self {
            registry,
            checks_dispatched_total,
            checks_in_flight,
            keepalives_sent_total,
            publish_errors_total,
            socket_payloads_total,
        })
    }

    pub fn record_check_dispatched(&self, check: &str) {
        self.checks_dispatched_total.with_label_values(&[check]).inc();
    }

    pub fn check_started(&self, check: &str) {
        self.checks_in_flight.with_label_values(&[check]).inc();
    }

    pub fn check_finished(&self, check: &str) {
        self.checks_in_flight.with_label_values(&[check]).dec();
    }

    pub fn record_keepalive(&self, client: &str) {
        self.keepalives_sent_total.with_label_values(&[client]).inc();
    }

    pub fn record_publish_error(&self, pipe: &str) {
        self.publish_errors_total.with_label_values(&[pipe]).inc();
    }

    pub fn record_socket_payload(&self, transport: &str) {
        self.socket_payloads_total.with_label_values(&[transport]).inc();
    }

    /// Gather available metrics into an encoded OpenMetrics text report.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let collected = self.registry.gather();
        let mut out = Vec::with_capacity(4096);
        TextEncoder::new()
            .encode(&collected, &mut out)
            .map_err(AgentError::Metrics)?;
        Ok(out)
    }
}

pub type SharedMetrics = Arc<AgentMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_recorded_series() {
        let metrics = AgentMetrics::new("h1").unwrap();
        metrics.record_check_dispatched("disk");
        metrics.record_keepalive("h1");
        let report = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(report.contains("nodewatch_checks_dispatched_total"));
        assert!(report.contains("nodewatch_keepalives_sent_total"));
    }

    #[test]
    fn in_flight_gauge_tracks_start_and_finish() {
        let metrics = AgentMetrics::new("h1").unwrap();
        metrics.check_started("disk");
        metrics.check_started("disk");
        metrics.check_finished("disk");
        let report = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(report.contains("nodewatch_checks_in_flight{check=\"disk\",client=\"h1\"} 1"));
    }
}
