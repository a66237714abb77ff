//! A tiny `warp`-backed HTTP server exposing the agent's metrics at
//! `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use warp::Filter;

use crate::metrics::AgentMetrics;

/// Start the metrics server on `addr`. Runs until the process exits; callers
/// that want a clean shutdown can abort the returned handle.
pub fn run_metrics_server(metrics: Arc<AgentMetrics>, addr: SocketAddr) -> JoinHandle<()> {
    tracing::info!(%addr, "starting metrics server");
    tokio::spawn(async move {
        let route = warp::path("metrics")
            .map(move || {
                let body = metrics.gather().unwrap_or_default();
                warp::reply::with_header(body, "Content-Type", "text/plain; charset=utf-8")
            })
            .or(warp::any().map(|| {
                warp::reply::with_status("go look at /metrics", warp::http::StatusCode::NOT_FOUND)
            }));
        warp::serve(route).run(addr).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let metrics = Arc::new(AgentMetrics::new("h1").unwrap());
        metrics.record_keepalive("h1");
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        // A real bind needs a fixed port to probe; this test only checks the
        // handle spawns and can be aborted without panicking.
        let handle = run_metrics_server(metrics, addr);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();
    }
}
