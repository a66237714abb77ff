//! Typed errors for the agent's library seams.
//!
//! Every fallible constructor in this crate returns [`AgentError`]; the binary
//! entry point wraps these in `eyre::Result` for top-level reporting.

use thiserror::Error;

/// Errors raised at the library boundaries of the agent core.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required client setting was missing or malformed.
    #[error("invalid client settings: {0}")]
    InvalidSettings(String),

    /// Binding a local result socket (TCP or UDP) failed. Fatal: the agent
    /// must not enter the `running` state.
    #[error("failed to bind {kind} socket on {addr}: {source}")]
    SocketBind {
        kind: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport failed to connect at `start`.
    #[error("transport connect failed: {0}")]
    TransportConnect(String),

    /// The Prometheus metrics registry rejected a metric registration.
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The metrics HTTP server failed to bind.
    #[error("metrics server failed to bind on {addr}: {source}")]
    MetricsBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;
