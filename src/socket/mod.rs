//! Local socket listeners: a TCP newline-delimited JSON reader and a
//! UDP datagram listener, both accepting externally-produced result
//! payloads and injecting them into the publisher.

mod tcp;
mod udp;

pub use tcp::serve_tcp;
pub use udp::serve_udp;

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

pub type ConnectionPool = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// One entry in the socket ledger. Acceptors are the listening servers
/// themselves; connections are the per-client tasks they spawn. Stop
/// distinguishes stopping the acceptor from closing live connections.
pub enum SocketHandle {
    Acceptor(JoinHandle<()>),
    Connections(ConnectionPool),
}

impl SocketHandle {
    fn abort(&self) {
        match self {
            SocketHandle::Acceptor(h) => h.abort(),
            SocketHandle::Connections(pool) => {
                for h in pool.lock().unwrap().drain(..) {
                    h.abort();
                }
            }
        }
    }
}

/// The socket ledger: acceptor/connection handles closed on stop.
#[derive(Default)]
pub struct SocketLedger {
    handles: Vec<SocketHandle>,
}

impl SocketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: SocketHandle) {
        self.handles.push(handle);
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Abort every handle and clear the ledger.
    pub fn close_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

/// Parse one newline/datagram-delimited payload into a [`crate::check::Check`]
/// result. Malformed payloads are logged and dropped by the caller.
pub fn parse_payload(raw: &str) -> serde_json::Result<crate::check::Check> {
    serde_json::from_str(raw.trim())
}
