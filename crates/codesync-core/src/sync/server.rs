//! WebSocket listener for plugin connections
//!
//! Each connection gets a reader loop (decoding JSON text frames into
//! [`InboundMessage`]s) and a writer task draining the peer's outbound
//! queue. Everything the reader sees is forwarded to the sync loop as a
//! [`PeerEvent`]; the listener itself holds no sync state.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::InboundMessage;
use super::transport::{new_peer_id, PeerHandle, PeerId, Transport, TransportError};

/// What a connection reports to the sync loop
#[derive(Debug)]
pub enum PeerEvent {
    Message {
        peer: PeerHandle,
        message: InboundMessage,
    },
    Closed {
        peer_id: PeerId,
    },
}

pub struct SyncServer {
    listener: TcpListener,
}

impl SyncServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the sync loop goes away
    pub async fn run(self, events: mpsc::UnboundedSender<PeerEvent>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let events = events.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, events).await {
                                warn!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept error: {}", e),
                },
                _ = events.closed() => {
                    debug!("Sync loop closed, stopping listener");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<(), TransportError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut frames) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let peer = PeerHandle::new(new_peer_id(), tx);
    info!("Peer {} connected from {}", peer.id(), addr);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if let Err(e) = sink.send(frame).await {
                debug!("Write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => match InboundMessage::decode(&text) {
                Ok(message) => {
                    debug!("Received {} from {}", message.kind(), peer.id());
                    let event = PeerEvent::Message {
                        peer: peer.clone(),
                        message,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring malformed message from {}: {}", peer.id(), e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Connection error from {}: {}", peer.id(), e);
                break;
            }
        }
    }

    info!("Peer {} disconnected", peer.id());
    let _ = events.send(PeerEvent::Closed {
        peer_id: peer.id().to_string(),
    });
    writer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::message::OutboundMessage;
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let server = SyncServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        tokio::spawn(server.run(events_tx));

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        client
            .send(Message::Text(
                r#"{"type":"handshake","projectId":"p1"}"#.to_string(),
            ))
            .await
            .unwrap();

        let peer = match events_rx.recv().await.unwrap() {
            PeerEvent::Message { peer, message } => {
                assert!(matches!(message, InboundMessage::Handshake { .. }));
                peer
            }
            other => panic!("Expected message, got {:?}", other),
        };

        assert!(peer.send(&OutboundMessage::RequestFiles));
        match client.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"type":"request-files"}"#),
            other => panic!("Expected text frame, got {:?}", other),
        }

        client.close(None).await.unwrap();
        match events_rx.recv().await.unwrap() {
            PeerEvent::Closed { peer_id } => assert_eq!(peer_id, peer.id()),
            other => panic!("Expected close, got {:?}", other),
        }
    }
}
