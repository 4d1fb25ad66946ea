//! Transport abstraction: request/response and fire-and-forget delivery of
//! envelopes to a peer identity.
//!
//! Inbound traffic is surfaced as a channel of [`Inbound`] items. Whoever
//! owns the receiving end dispatches them to a [`Handler`].

use async_trait::async_trait;
use tokio::sync::oneshot;

use weft_core::PeerId;

use crate::error::Result;
use crate::messages::Envelope;

/// Transport trait for reaching peers.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// The local peer identity.
    fn local_peer(&self) -> PeerId;

    /// Send a request and wait for the peer's reply.
    ///
    /// Callers bound the wait with their own timeout.
    async fn send_request(&self, peer: &PeerId, envelope: Envelope) -> Result<Envelope>;

    /// Deliver an envelope without waiting for a reply.
    async fn send_message(&self, peer: &PeerId, envelope: Envelope) -> Result<()>;

    /// Drop the link to `peer`.
    async fn disconnect(&self, peer: &PeerId) -> Result<()>;

    /// Peers currently reachable.
    async fn connected_peers(&self) -> Result<Vec<PeerId>>;
}

/// Something that answers inbound envelopes.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one envelope. The return value is sent back when the sender
    /// is waiting for a reply.
    async fn handle(&self, from: PeerId, envelope: Envelope) -> Option<Envelope>;
}

/// An envelope received from a peer.
#[derive(Debug)]
pub struct Inbound {
    pub from: PeerId,
    pub envelope: Envelope,
    /// Present when the sender awaits a reply.
    pub reply: Option<oneshot::Sender<Envelope>>,
}

impl Inbound {
    /// Answer the sender, if it is waiting. A vanished sender is not an error.
    pub fn respond(self, envelope: Envelope) {
        if let Some(reply) = self.reply {
            let _ = reply.send(envelope);
        }
    }
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate message passing between nodes. Envelopes are
/// encoded and decoded on every hop, like a real wire.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    use crate::error::NetError;

    /// Capacity of each node's inbound channel.
    const INBOX_CAPACITY: usize = 1024;

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        inboxes: RwLock<HashMap<PeerId, mpsc::Sender<Inbound>>>,
        /// Severed links, stored with the smaller peer first.
        cut: RwLock<HashSet<(PeerId, PeerId)>>,
    }

    fn link(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
        if a <= b {
            (*a, *b)
        } else {
            (*b, *a)
        }
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a peer. Returns its transport and its inbound stream.
        pub async fn create_transport(
            self: &Arc<Self>,
            peer: PeerId,
        ) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            self.inboxes.write().await.insert(peer, tx);
            let transport = MemoryTransport {
                peer,
                network: Arc::clone(self),
            };
            (transport, rx)
        }

        /// Take a peer off the network entirely.
        pub async fn remove(&self, peer: &PeerId) {
            self.inboxes.write().await.remove(peer);
        }

        /// Sever the link between two peers.
        pub async fn cut(&self, a: &PeerId, b: &PeerId) {
            self.cut.write().await.insert(link(a, b));
        }

        /// Restore a severed link.
        pub async fn heal(&self, a: &PeerId, b: &PeerId) {
            self.cut.write().await.remove(&link(a, b));
        }

        async fn inbox(&self, from: &PeerId, to: &PeerId) -> Result<mpsc::Sender<Inbound>> {
            if self.cut.read().await.contains(&link(from, to)) {
                return Err(NetError::PeerNotConnected(to.to_string()));
            }
            self.inboxes
                .read()
                .await
                .get(to)
                .cloned()
                .ok_or_else(|| NetError::PeerNotConnected(to.to_string()))
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        peer: PeerId,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        async fn deliver(
            &self,
            to: &PeerId,
            envelope: &Envelope,
            reply: Option<oneshot::Sender<Envelope>>,
        ) -> Result<()> {
            let inbox = self.network.inbox(&self.peer, to).await?;
            tracing::trace!(
                from = %self.peer,
                to = %to,
                message = envelope.message.label(),
                "memory deliver"
            );
            let envelope = Envelope::from_bytes(&envelope.to_bytes()?)?;
            inbox
                .send(Inbound {
                    from: self.peer,
                    envelope,
                    reply,
                })
                .await
                .map_err(|_| NetError::Transport(format!("inbox of {} closed", to)))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn local_peer(&self) -> PeerId {
            self.peer
        }

        async fn send_request(&self, peer: &PeerId, envelope: Envelope) -> Result<Envelope> {
            let (tx, rx) = oneshot::channel();
            self.deliver(peer, &envelope, Some(tx)).await?;
            let reply = rx
                .await
                .map_err(|_| NetError::NoResponse(peer.to_string()))?;
            Envelope::from_bytes(&reply.to_bytes()?)
        }

        async fn send_message(&self, peer: &PeerId, envelope: Envelope) -> Result<()> {
            self.deliver(peer, &envelope, None).await
        }

        async fn disconnect(&self, peer: &PeerId) -> Result<()> {
            self.network.cut(&self.peer, peer).await;
            Ok(())
        }

        async fn connected_peers(&self) -> Result<Vec<PeerId>> {
            let inboxes = self.network.inboxes.read().await;
            let cut = self.network.cut.read().await;
            let mut peers: Vec<PeerId> = inboxes
                .keys()
                .filter(|p| **p != self.peer && !cut.contains(&link(&self.peer, p)))
                .copied()
                .collect();
            peers.sort();
            Ok(peers)
        }
    }
}
