//! The transport adapter trait and an in-memory reference implementation.
//!
//! The wire protocol is explicitly out of scope: a real deployment backs
//! this trait with a broker client. The in-memory implementation here exists
//! so the rest of the crate — and its own tests — has something to run
//! against, grounded on the single-writer, many-reader channel pattern used
//! throughout the corpus for pub/sub fan-out.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// How a publish is delivered to subscribers of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPattern {
    /// Exactly the named funnel receives the message (used for both `direct`
    /// and `roundrobin` subscriptions).
    Direct,
    /// Every distinct funnel subscribed to the pipe receives an independent
    /// copy.
    Fanout,
}

/// A handle representing an active subscription, used to unsubscribe.
pub struct Subscription {
    pipe: String,
    funnel: String,
}

/// The transport boundary. A publish error is reported through the `Result`;
/// the caller (the keepalive engine or the result publisher) is responsible
/// for logging it — the transport itself never retries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` (already serialized as a UTF-8 text object) to
    /// `pipe` with the given delivery pattern.
    async fn publish(
        &self,
        pipe: &str,
        pattern: DeliveryPattern,
        funnel: &str,
        payload: String,
    ) -> Result<(), TransportError>;

    /// Subscribe to `pipe` under `funnel`; decoded messages are delivered to
    /// `handler`. Returns a handle usable with [`Transport::unsubscribe`].
    async fn subscribe(
        &self,
        pipe: &str,
        pattern: DeliveryPattern,
        funnel: &str,
        handler: Box<dyn Fn(String) + Send + Sync>,
    ) -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, subscription: Subscription);

    /// Whether the transport currently has a live connection to the broker.
    fn is_connected(&self) -> bool;

    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// An in-process transport backed by one `tokio::sync::broadcast` channel per
/// pipe. `Direct` and `Fanout` are both modeled as broadcast so every
/// subscribed funnel gets the message; this is adequate for a reference
/// implementation and for tests, which never rely on cross-process delivery.
pub struct InMemoryTransport {
    pipes: Mutex<HashMap<String, broadcast::Sender<String>>>,
    connected: std::sync::atomic::AtomicBool,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            pipes: Mutex::new(HashMap::new()),
            connected: std::sync::atomic::AtomicBool::new(true),
        }
    }

    fn sender_for(&self, pipe: &str) -> broadcast::Sender<String> {
        let mut pipes = self.pipes.lock().unwrap();
        pipes
            .entry(pipe.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(
        &self,
        pipe: &str,
        _pattern: DeliveryPattern,
        _funnel: &str,
        payload: String,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError("not connected".into()));
        }
        // A send with no subscribers is not an error: it mirrors a broker
        // accepting a publish with nobody currently listening.
        let _ = self.sender_for(pipe).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        pipe: &str,
        _pattern: DeliveryPattern,
        funnel: &str,
        handler: Box<dyn Fn(String) + Send + Sync>,
    ) -> Result<Subscription, TransportError> {
        let mut rx = self.sender_for(pipe).subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => handler(msg),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription {
            pipe: pipe.to_string(),
            funnel: funnel.to_string(),
        })
    }

    async fn unsubscribe(&self, subscription: Subscription) {
        // The spawned receiver task above exits on its own once the sender
        // side (this transport) is dropped or the channel is closed; nothing
        // further to tear down for the in-memory reference implementation
        // beyond acknowledging the handle.
        drop(subscription);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::Relaxed)
    }

    async fn close(&self) {
        self.connected
            .store(false, std::sync::atomic::Ordering::Relaxed);
        self.pipes.lock().unwrap().clear();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pipe", &self.pipe)
            .field("funnel", &self.funnel)
            .finish()
    }
}
