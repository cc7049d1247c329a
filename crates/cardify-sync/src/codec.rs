//! Wire codec for replication messages.
//!
//! Every payload is a versioned JSON envelope:
//!
//! ```text
//! {"version":1,"message":{"kind":"anchor_delta","payload":{"op":"add","target":{..anchor..}}}}
//! {"version":1,"message":{"kind":"world_map_snapshot","payload":{"frame":{..},"anchors":[..]}}}
//! ```
//!
//! Pose elements are written as shortest round-trip decimals and parsed back
//! with correct rounding, so every `f64` survives bit-for-bit. JSON has no
//! NaN or infinity, so non-finite poses are rejected on both sides.

use cardify_core::{Anchor, AnchorId, WorldMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current envelope format version.
pub const WIRE_VERSION: u64 = 1;

/// An incremental change to the anchor set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "target", rename_all = "snake_case")]
pub enum AnchorDelta {
    Add(Anchor),
    Remove(AnchorId),
}

impl AnchorDelta {
    pub fn anchor_id(&self) -> &AnchorId {
        match self {
            AnchorDelta::Add(anchor) => &anchor.id,
            AnchorDelta::Remove(id) => id,
        }
    }
}

/// Messages exchanged between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ReplicationMessage {
    /// Full spatial frame plus anchors; replaces the receiver's state.
    WorldMapSnapshot(WorldMap),
    /// A single add or remove.
    AnchorDelta(AnchorDelta),
}

impl ReplicationMessage {
    pub fn add(anchor: Anchor) -> Self {
        ReplicationMessage::AnchorDelta(AnchorDelta::Add(anchor))
    }

    pub fn remove(id: AnchorId) -> Self {
        ReplicationMessage::AnchorDelta(AnchorDelta::Remove(id))
    }

    pub fn snapshot(map: WorldMap) -> Self {
        ReplicationMessage::WorldMapSnapshot(map)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationMessage::WorldMapSnapshot(_) => "world_map_snapshot",
            ReplicationMessage::AnchorDelta(AnchorDelta::Add(_)) => "anchor_add",
            ReplicationMessage::AnchorDelta(AnchorDelta::Remove(_)) => "anchor_remove",
        }
    }

    /// First anchor whose pose has a NaN or infinite element.
    fn first_non_finite(&self) -> Option<&AnchorId> {
        let mut anchors: Box<dyn Iterator<Item = &Anchor>> = match self {
            ReplicationMessage::WorldMapSnapshot(map) => Box::new(map.anchors.iter()),
            ReplicationMessage::AnchorDelta(AnchorDelta::Add(anchor)) => {
                Box::new(std::iter::once(anchor))
            }
            ReplicationMessage::AnchorDelta(AnchorDelta::Remove(_)) => {
                Box::new(std::iter::empty())
            }
        };
        anchors.find(|a| !a.pose.is_finite()).map(|a| &a.id)
    }
}

/// Errors while producing a wire payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Anchor {0} has a non-finite pose")]
    NonFinitePose(AnchorId),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors while reading a wire payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u64),

    #[error("Anchor {0} has a non-finite pose")]
    NonFinitePose(AnchorId),
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    version: u64,
    message: &'a ReplicationMessage,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    version: u64,
    message: serde_json::Value,
}

/// Serialize a message to its wire form.
pub fn encode(message: &ReplicationMessage) -> Result<Vec<u8>, EncodeError> {
    if let Some(id) = message.first_non_finite() {
        return Err(EncodeError::NonFinitePose(id.clone()));
    }

    serde_json::to_vec(&OutgoingEnvelope {
        version: WIRE_VERSION,
        message,
    })
    .map_err(|e| EncodeError::Serialization(e.to_string()))
}

/// Parse a wire payload.
pub fn decode(bytes: &[u8]) -> Result<ReplicationMessage, DecodeError> {
    let envelope: IncomingEnvelope =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if envelope.version != WIRE_VERSION {
        return Err(DecodeError::UnsupportedVersion(envelope.version));
    }

    let message: ReplicationMessage = serde_json::from_value(envelope.message)
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if let Some(id) = message.first_non_finite() {
        return Err(DecodeError::NonFinitePose(id.clone()));
    }
    Ok(message)
}
