//! Outbound side of a peer connection
//!
//! The engine only needs "send returns success or failure". A [`PeerHandle`]
//! queues encoded frames for the connection's writer task; tests substitute
//! their own [`Transport`].

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use super::message::OutboundMessage;

/// Peer identifier
pub type PeerId = String;

/// Errors from the connection layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something the engine can push messages to
pub trait Transport: Send + Sync {
    fn id(&self) -> &str;

    /// Queue a message; false when the peer is gone or encoding failed
    fn send(&self, message: &OutboundMessage) -> bool;
}

/// Generate a short peer id
pub fn new_peer_id() -> PeerId {
    format!("peer-{}", &uuid::Uuid::new_v4().to_string()[..8])
}

/// Handle to a live WebSocket peer
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    pub fn new(id: PeerId, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, tx }
    }

    /// Ask the writer task to close the socket
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Transport for PeerHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, message: &OutboundMessage) -> bool {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode message for {}: {}", self.id, e);
                return false;
            }
        };
        self.tx.send(Message::Text(text)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_handle_send() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = PeerHandle::new("peer-1".to_string(), tx);

        assert!(peer.send(&OutboundMessage::RequestFiles));
        match rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"type":"request-files"}"#),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_send_to_closed_peer_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = PeerHandle::new(new_peer_id(), tx);
        drop(rx);

        assert!(peer.is_closed());
        assert!(!peer.send(&OutboundMessage::RequestFiles));
    }

    #[test]
    fn test_peer_id_format() {
        let id = new_peer_id();
        assert!(id.starts_with("peer-"));
        assert_eq!(id.len(), "peer-".len() + 8);
    }
}
