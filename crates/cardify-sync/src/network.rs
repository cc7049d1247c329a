//! Peer transport abstractions.
//!
//! The transport delivers opaque byte payloads to connected peers, reliably
//! and in order per sender. Discovery, retries and backoff all live behind
//! [`PeerTransport`]; replication code only sees "who is connected",
//! "send to everyone" and "a payload arrived".

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected peer as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub display_name: String,
}

impl PeerIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: PeerId::new(id),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Why a broadcast could not be handed to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("No connected peers")]
    NoPeers,

    #[error("Transport down: {0}")]
    TransportDown(String),
}

/// Callback invoked once per inbound payload with the sender's identity.
pub type ReceiveHandler = Arc<dyn Fn(PeerIdentity, Vec<u8>) + Send + Sync>;

/// Abstract peer transport.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Identity this transport presents to peers.
    fn local_peer(&self) -> PeerIdentity;

    /// Currently connected peers. Can change between calls.
    async fn connected_peers(&self) -> Vec<PeerIdentity>;

    /// Best-effort delivery to every connected peer. Never retried here.
    async fn send_to_all(&self, payload: &[u8]) -> Result<(), SendError>;

    /// Register the inbound payload handler, replacing any previous one.
    fn on_receive(&self, handler: ReceiveHandler);
}

type SharedHandler = Arc<RwLock<Option<ReceiveHandler>>>;

/// One direction of a connection between two memory transports.
#[derive(Clone)]
struct Link {
    identity: PeerIdentity,
    inbox: SharedHandler,
    online: Arc<AtomicBool>,
}

/// In-memory transport for tests, demos and simulation.
///
/// Delivery calls the receiving peer's handler synchronously from
/// `send_to_all`, so per-sender ordering holds trivially.
pub struct MemoryTransport {
    local: PeerIdentity,
    inbox: SharedHandler,
    links: Arc<RwLock<Vec<Link>>>,
    online: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new(local: PeerIdentity) -> Self {
        Self {
            local,
            inbox: Arc::new(RwLock::new(None)),
            links: Arc::new(RwLock::new(Vec::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local.id
    }

    fn as_link(&self) -> Link {
        Link {
            identity: self.local.clone(),
            inbox: self.inbox.clone(),
            online: self.online.clone(),
        }
    }

    /// Connect two memory transports together, in both directions.
    pub fn connect_to(&self, other: &MemoryTransport) {
        if self.local.id == other.local.id {
            return;
        }

        {
            let mut links = self.links.write();
            if !links.iter().any(|l| l.identity.id == other.local.id) {
                links.push(other.as_link());
            }
        }

        let mut links = other.links.write();
        if !links.iter().any(|l| l.identity.id == self.local.id) {
            links.push(self.as_link());
        }
    }

    /// Drop the connection between two transports.
    pub fn disconnect_from(&self, other: &MemoryTransport) {
        self.links.write().retain(|l| l.identity.id != other.local.id);
        other.links.write().retain(|l| l.identity.id != self.local.id);
    }

    /// Simulate the radio going down or coming back.
    ///
    /// An offline transport fails every send and drops inbound payloads.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn local_peer(&self) -> PeerIdentity {
        self.local.clone()
    }

    async fn connected_peers(&self) -> Vec<PeerIdentity> {
        if !self.is_online() {
            return Vec::new();
        }
        self.links.read().iter().map(|l| l.identity.clone()).collect()
    }

    async fn send_to_all(&self, payload: &[u8]) -> Result<(), SendError> {
        if !self.is_online() {
            return Err(SendError::TransportDown(format!("{} is offline", self.local.id)));
        }

        let links: Vec<Link> = self.links.read().clone();
        if links.is_empty() {
            return Err(SendError::NoPeers);
        }

        for link in links {
            if !link.online.load(Ordering::SeqCst) {
                tracing::debug!(peer = %link.identity.id, "peer offline, payload dropped");
                continue;
            }
            let handler = link.inbox.read().clone();
            match handler {
                Some(handler) => handler(self.local.clone(), payload.to_vec()),
                None => {
                    tracing::debug!(peer = %link.identity.id, "peer has no receive handler, payload dropped")
                }
            }
        }
        Ok(())
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        *self.inbox.write() = Some(handler);
    }
}

/// Create a fully connected mesh of memory transports, one per name.
pub fn create_network(names: &[&str]) -> Vec<Arc<MemoryTransport>> {
    let transports: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            Arc::new(MemoryTransport::new(PeerIdentity::new(
                format!("peer-{}", i),
                *name,
            )))
        })
        .collect();

    for i in 0..transports.len() {
        for j in (i + 1)..transports.len() {
            transports[i].connect_to(&transports[j]);
        }
    }

    transports
}
