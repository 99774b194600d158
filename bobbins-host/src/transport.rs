//! Bridge transports.
//!
//! A transport moves raw JSON frames between two execution contexts. Every
//! frame is stamped with the sender's origin by the transport itself, so the
//! receiving side can trust the origin even though it cannot trust the
//! payload.

use crate::error::{HostError, HostResult};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A frame as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    /// Origin attested by the transport.
    pub origin: String,
    pub payload: Value,
}

/// Outbound half of a bridge connection.
pub trait BridgeTransport: Send + Sync {
    /// Origin stamped on frames posted through this transport.
    fn origin(&self) -> &str;

    fn post(&self, payload: Value) -> HostResult<()>;
}

/// In-memory transport backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    origin: String,
    tx: mpsc::UnboundedSender<WireFrame>,
}

/// One side of a connected [`ChannelTransport`] pair.
#[derive(Debug)]
pub struct TransportEnd {
    pub transport: Arc<ChannelTransport>,
    pub inbound: mpsc::UnboundedReceiver<WireFrame>,
}

impl ChannelTransport {
    pub fn new(origin: impl Into<String>, tx: mpsc::UnboundedSender<WireFrame>) -> Self {
        Self {
            origin: origin.into(),
            tx,
        }
    }

    /// Two connected ends. Frames posted on one arrive on the other.
    pub fn pair(origin_a: impl Into<String>, origin_b: impl Into<String>) -> (TransportEnd, TransportEnd) {
        let (tx_to_b, rx_at_b) = mpsc::unbounded_channel();
        let (tx_to_a, rx_at_a) = mpsc::unbounded_channel();
        let a = TransportEnd {
            transport: Arc::new(Self::new(origin_a, tx_to_b)),
            inbound: rx_at_a,
        };
        let b = TransportEnd {
            transport: Arc::new(Self::new(origin_b, tx_to_a)),
            inbound: rx_at_b,
        };
        (a, b)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl BridgeTransport for ChannelTransport {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn post(&self, payload: Value) -> HostResult<()> {
        self.tx
            .send(WireFrame {
                origin: self.origin.clone(),
                payload,
            })
            .map_err(|_| HostError::BridgeClosed("peer endpoint dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pair_stamps_sender_origin() {
        let (mut host, mut guest) = ChannelTransport::pair("app://shell", "sandbox://bobbins");
        host.transport.post(json!({"type": "shell.ready"})).unwrap();

        let frame = guest.inbound.recv().await.unwrap();
        assert_eq!(frame.origin, "app://shell");
        assert_eq!(frame.payload["type"], "shell.ready");

        guest.transport.post(json!({"type": "view.ready"})).unwrap();
        assert_eq!(host.inbound.recv().await.unwrap().origin, "sandbox://bobbins");
    }

    #[test]
    fn post_after_peer_drop_fails() {
        let (host, guest) = ChannelTransport::pair("a", "b");
        drop(guest);
        assert!(host.transport.is_closed());
        assert!(matches!(
            host.transport.post(json!({})),
            Err(HostError::BridgeClosed(_))
        ));
    }
}
