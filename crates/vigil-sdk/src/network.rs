//! Network transport abstractions for producer/consumer synchronization.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use vigil_core::Version;
use vigil_sync::ChangeSetWire;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages exchanged between a producer and its consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Consumer handshake, carrying the version its mirror has confirmed.
    Hello { name: String, confirmed: Version },
    /// Ask for every change after `since`.
    SyncRequest { since: Version },
    /// A ChangeSet, incremental or snapshot.
    Changes(ChangeSetWire),
    /// `since` predates the producer's history; a snapshot follows.
    ResyncRequired { since: Version, horizon: Version },
    /// The consumer's mirror is confirmed up to `version`.
    Ack { version: Version },
    /// The consumer is leaving; its acknowledgements no longer count.
    Goodbye,
    Ping,
    Pong,
}

impl Message {
    /// Frame for byte-oriented transports.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Network error type.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Peer not found: {0}")]
    PeerNotFound(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Disconnected")]
    Disconnected,
}

/// Abstract network transport trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Send a message to a specific peer.
    async fn send(&self, peer_id: &PeerId, message: Message) -> Result<(), NetworkError>;

    /// Take the stream of incoming messages. Only the first call gets it.
    fn subscribe(&self) -> Option<mpsc::Receiver<(PeerId, Message)>>;
}

/// Type alias for the message receiver shared across threads.
type SharedMessageReceiver = Arc<RwLock<Option<mpsc::Receiver<(PeerId, Message)>>>>;
/// Type alias for the outgoing message senders shared across threads.
type SharedOutgoing = Arc<RwLock<HashMap<PeerId, mpsc::Sender<(PeerId, Message)>>>>;

/// In-memory transport for tests and the demo.
pub struct MemoryTransport {
    local_id: PeerId,
    message_tx: mpsc::Sender<(PeerId, Message)>,
    message_rx: SharedMessageReceiver,
    outgoing: SharedOutgoing,
}

impl MemoryTransport {
    pub fn new(local_id: PeerId) -> Self {
        Self::with_capacity(local_id, 256)
    }

    pub fn with_capacity(local_id: PeerId, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            local_id,
            message_tx: tx,
            message_rx: Arc::new(RwLock::new(Some(rx))),
            outgoing: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Peers this transport can send to, sorted.
    pub fn routes(&self) -> Vec<PeerId> {
        let mut routes: Vec<PeerId> = self.outgoing.read().keys().cloned().collect();
        routes.sort();
        routes
    }

    /// Wire two memory transports together in both directions.
    pub fn connect_to(&self, other: &MemoryTransport) {
        self.link(other);
        other.link(self);
    }

    fn link(&self, other: &MemoryTransport) {
        self.outgoing
            .write()
            .insert(other.local_id.clone(), other.message_tx.clone());
    }
}

#[async_trait]
impl NetworkTransport for MemoryTransport {
    async fn send(&self, peer_id: &PeerId, message: Message) -> Result<(), NetworkError> {
        let tx = {
            let outgoing = self.outgoing.read();
            outgoing.get(peer_id).cloned()
        };

        match tx {
            Some(tx) => tx
                .send((self.local_id.clone(), message))
                .await
                .map_err(|e| NetworkError::SendFailed(e.to_string())),
            None => Err(NetworkError::PeerNotFound(peer_id.to_string())),
        }
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<(PeerId, Message)>> {
        self.message_rx.write().take()
    }
}

/// Create a fully connected set of memory transports (`peer-0`, `peer-1`, ...).
pub fn create_network(count: usize) -> Vec<MemoryTransport> {
    let transports: Vec<_> = (0..count)
        .map(|i| MemoryTransport::new(PeerId::new(format!("peer-{}", i))))
        .collect();

    for i in 0..count {
        for j in (i + 1)..count {
            transports[i].connect_to(&transports[j]);
        }
    }

    transports
}
