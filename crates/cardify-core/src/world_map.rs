//! World map snapshots.
//!
//! A [`WorldMap`] pairs the opaque spatial tracking state captured by the
//! tracking subsystem ([`SpatialFrame`]) with every anchor present at
//! capture time. Peers adopting a world map adopt both at once.

use crate::anchor::Anchor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque spatial tracking state, produced by the tracking subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialFrame {
    /// Identifier assigned by the tracking subsystem.
    pub id: String,
    /// Tracking state blob. Never interpreted by this crate.
    pub data: Vec<u8>,
}

impl SpatialFrame {
    pub fn new(id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A snapshot of a device's spatial frame and its anchors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    pub frame: SpatialFrame,
    pub anchors: Vec<Anchor>,
}

impl WorldMap {
    pub fn new(frame: SpatialFrame, anchors: Vec<Anchor>) -> Self {
        Self { frame, anchors }
    }

    /// Content hash over the frame and every anchor, in order.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.frame.id.as_bytes());
        hasher.update((self.frame.data.len() as u64).to_le_bytes());
        hasher.update(&self.frame.data);
        for anchor in &self.anchors {
            hasher.update(anchor.id.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(anchor.label.as_bytes());
            hasher.update([0u8]);
            for value in anchor.pose.values() {
                hasher.update(value.to_bits().to_le_bytes());
            }
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Fingerprint(bytes)
    }
}

/// SHA-256 digest identifying a world map's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}...)", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
