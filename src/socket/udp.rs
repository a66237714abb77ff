use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::agent::Event;
use crate::error::{AgentError, Result};

/// Bind a UDP socket on `addr` and spawn the datagram loop. Each datagram is
/// treated as one payload and sent as an [`Event::SocketPayload`]. The
/// listener itself is the single handle tracked in the socket ledger; unlike
/// TCP there is no separate per-peer connection state.
pub async fn serve_udp(
    addr: std::net::SocketAddr,
    event_tx: mpsc::Sender<Event>,
) -> Result<JoinHandle<()>> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| AgentError::SocketBind {
            kind: "udp",
            addr: addr.to_string(),
            source,
        })?;

    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _peer)) => {
                    let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
                    if payload.trim().is_empty() {
                        continue;
                    }
                    if event_tx
                        .send(Event::SocketPayload {
                            transport: "udp",
                            payload,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "udp recv failed"),
            }
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_datagram_and_forwards_payload() {
        let (tx, mut rx) = mpsc::channel(8);
        let bind_probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bound = bind_probe.local_addr().unwrap();
        drop(bind_probe);

        let _handle = serve_udp(bound, tx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"{\"client\":\"h1\",\"check\":{\"name\":\"disk\",\"status\":0}}", bound)
            .await
            .unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::SocketPayload { transport, payload } => {
                assert_eq!(transport, "udp");
                assert!(payload.contains("disk"));
            }
            _ => panic!("unexpected event"),
        }
    }
}
