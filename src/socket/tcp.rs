use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::agent::Event;
use crate::error::{AgentError, Result};

use super::ConnectionPool;

/// Bind a TCP listener on `addr` and spawn the accept loop. Each accepted
/// connection is read as newline-delimited JSON; each line becomes an
/// [`Event::SocketPayload`] sent to `event_tx`.
///
/// Returns the acceptor task handle and the pool of per-connection task
/// handles, tracked separately per the socket ledger's acceptor/connection
/// distinction.
pub async fn serve_tcp(
    addr: std::net::SocketAddr,
    event_tx: mpsc::Sender<Event>,
) -> Result<(JoinHandle<()>, ConnectionPool)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AgentError::SocketBind {
            kind: "tcp",
            addr: addr.to_string(),
            source,
        })?;

    let connections: ConnectionPool = Arc::new(Mutex::new(Vec::new()));
    let connections_for_loop = connections.clone();

    let acceptor = tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "tcp accept failed");
                    continue;
                }
            };
            let tx = event_tx.clone();
            let handle = tokio::spawn(async move {
                let mut lines = BufReader::new(stream).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if tx
                                .send(Event::SocketPayload {
                                    transport: "tcp",
                                    payload: line,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, %peer, "tcp connection read failed");
                            break;
                        }
                    }
                }
            });
            connections_for_loop.lock().unwrap().push(handle);
        }
    });

    Ok((acceptor, connections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepts_connection_and_forwards_line() {
        let (tx, mut rx) = mpsc::channel(8);
        let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        drop(listener);

        let (_acceptor, _connections) = serve_tcp(bound, tx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client = TcpStream::connect(bound).await.unwrap();
        client
            .write_all(b"{\"client\":\"h1\",\"check\":{\"name\":\"disk\",\"status\":0}}\n")
            .await
            .unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::SocketPayload { transport, payload } => {
                assert_eq!(transport, "tcp");
                assert!(payload.contains("disk"));
            }
            _ => panic!("unexpected event"),
        }
    }
}
