//! # cardify-core
//!
//! Data model for replicating placed AR content between nearby devices.
//!
//! This crate provides:
//! - [`Pose`]: column-major 4x4 world transforms
//! - [`Anchor`]: a labelled, posed point representing a placed object
//! - [`WorldMap`]: a spatial frame plus every anchor present at capture time
//! - [`AnchorStore`]: the single authority for this device's anchors
//!
//! ## Example
//!
//! ```rust
//! use cardify_core::{Anchor, AnchorStore, Pose, SpatialFrame, WorldMap};
//!
//! let mut store = AnchorStore::new();
//! let card = Anchor::new("card", Pose::from_translation(0.0, 0.0, -0.5));
//! store.add(card.clone()).unwrap();
//!
//! // Adopting a peer's world map discards local anchors.
//! let map = WorldMap::new(SpatialFrame::new("peer-frame", vec![]), vec![]);
//! store.replace_all(map).unwrap();
//! assert!(store.is_empty());
//! ```

pub mod anchor;
pub mod pose;
pub mod store;
pub mod world_map;

pub use anchor::{Anchor, AnchorId, DEFAULT_LABEL};
pub use pose::Pose;
pub use store::{AnchorStore, StoreError, StoreEvent};
pub use world_map::{Fingerprint, SpatialFrame, WorldMap};
