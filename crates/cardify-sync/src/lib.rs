//! Cardify Sync - peer replication for shared AR sessions
//!
//! Nearby devices share placed cards by exchanging two kinds of message:
//! a full world map snapshot (spatial frame plus every anchor) that lets a
//! peer adopt the sender's coordinate frame, and incremental anchor deltas
//! for each placement or removal after that.
//!
//! # Quick Start
//!
//! ```rust
//! use cardify_sync::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let transports = create_network(&["Alice", "Bob"]);
//! let alice = Replica::spawn(
//!     ReplicaConfig::default(),
//!     transports[0].clone(),
//!     Arc::new(SimulatedTracking::mapped()),
//! );
//! let bob = Replica::spawn(
//!     ReplicaConfig::default(),
//!     transports[1].clone(),
//!     Arc::new(SimulatedTracking::mapped()),
//! );
//!
//! // Alice shares her map, then places a card on it
//! alice.share_map().await.unwrap();
//! let card = alice.place(Pose::from_translation(0.0, 0.0, -0.5)).await.unwrap();
//!
//! let view = bob.settle().await.unwrap();
//! assert_eq!(view.anchor_ids(), vec![card.value.id]);
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`codec`] - Versioned wire format for replication messages
//! - [`network`] - Peer transport abstraction and in-memory transport
//! - [`tracking`] - Tracking subsystem interface and a simulated source
//! - [`reconcile`] - Applies local intent and remote messages to the store
//! - [`session`] - Status line and the map-sharing gate
//! - [`replica`] - Per-device coordinator task
//! - [`config`] - Replica configuration
//! - [`error`] - Error types

pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod reconcile;
pub mod replica;
pub mod session;
pub mod tracking;

// Re-exports for convenience
pub use codec::{
    decode, encode, AnchorDelta, DecodeError, EncodeError, ReplicationMessage, WIRE_VERSION,
};
pub use config::{ReplicaConfig, ReplicaConfigBuilder};
pub use error::{Result, SyncError};
pub use network::{
    create_network, MemoryTransport, PeerId, PeerIdentity, PeerTransport, ReceiveHandler,
    SendError,
};
pub use reconcile::{Moved, Outbound, Reconciled, ReconciliationEngine, SyncState};
pub use replica::{LocalChange, Replica, ReplicaHandle, ReplicaView};
pub use session::{SessionController, ShareBlock, StatusMessage};
pub use tracking::{
    LimitedReason, MappingStatus, SimulatedTracking, TrackingError, TrackingEvent,
    TrackingHandler, TrackingQuality, TrackingSource,
};

// Re-export the data model
pub use cardify_core::{
    Anchor, AnchorId, AnchorStore, Fingerprint, Pose, SpatialFrame, StoreError, StoreEvent,
    WorldMap,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ReplicaConfig, ReplicaConfigBuilder};
    pub use crate::error::SyncError;
    pub use crate::network::{create_network, MemoryTransport, PeerIdentity, PeerTransport};
    pub use crate::replica::{Replica, ReplicaHandle, ReplicaView};
    pub use crate::session::StatusMessage;
    pub use crate::tracking::{MappingStatus, SimulatedTracking, TrackingQuality, TrackingSource};
    pub use cardify_core::{Anchor, AnchorId, Pose, StoreEvent};
}
