//! Placed-object anchors.

use crate::pose::Pose;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Label given to anchors placed by the card demo.
pub const DEFAULT_LABEL: &str = "card";

/// Unique identifier for an anchor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(pub String);

impl AnchorId {
    /// Generate a fresh, globally unique id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AnchorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named, posed point in world space representing a placed object.
///
/// Anchors are immutable: moving one means removing it and creating a new
/// anchor (with a new id) at the target pose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: AnchorId,
    pub label: String,
    pub pose: Pose,
}

impl Anchor {
    /// Create an anchor with a freshly generated id.
    pub fn new(label: impl Into<String>, pose: Pose) -> Self {
        Self {
            id: AnchorId::generate(),
            label: label.into(),
            pose,
        }
    }

    /// Create an anchor with a caller-chosen id.
    pub fn with_id(id: AnchorId, label: impl Into<String>, pose: Pose) -> Self {
        Self {
            id,
            label: label.into(),
            pose,
        }
    }

    /// A new anchor with the same label at `pose`, under a fresh id.
    pub fn relocated(&self, pose: Pose) -> Self {
        Self::new(self.label.clone(), pose)
    }

    /// Whether the rendering layer should materialize this anchor.
    pub fn is_renderable(&self, label_prefix: &str) -> bool {
        self.label.starts_with(label_prefix)
    }
}
