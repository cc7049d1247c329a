//! The anchor store: this device's authoritative view of shared content.
//!
//! The store holds the placed anchors in insertion order together with the
//! active spatial frame. Every mutation queues a [`StoreEvent`] so the
//! rendering layer can materialize or destroy visual objects without polling.

use crate::anchor::{Anchor, AnchorId};
use crate::world_map::{SpatialFrame, WorldMap};
use indexmap::IndexMap;
use std::collections::VecDeque;
use thiserror::Error;

/// Errors from store mutations.
///
/// Both variants are expected under message redelivery and concurrent edits;
/// replication code treats them as benign.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Anchor already present: {0}")]
    DuplicateId(AnchorId),

    #[error("Anchor not found: {0}")]
    NotFound(AnchorId),
}

/// Change notifications for observers of the store.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    /// An anchor was added.
    AnchorAdded(Anchor),
    /// An anchor was removed.
    AnchorRemoved(AnchorId),
    /// The whole anchor set was swapped for a world map's contents.
    Replaced {
        removed: Vec<AnchorId>,
        added: Vec<Anchor>,
    },
    /// Every anchor and the active frame were dropped.
    Cleared { removed: Vec<AnchorId> },
}

/// Insertion-ordered anchor set plus the active spatial frame.
#[derive(Debug, Default)]
pub struct AnchorStore {
    anchors: IndexMap<AnchorId, Anchor>,
    frame: Option<SpatialFrame>,
    pending_events: VecDeque<StoreEvent>,
}

impl AnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an anchor. Fails if an anchor with the same id is present.
    pub fn add(&mut self, anchor: Anchor) -> Result<(), StoreError> {
        if self.anchors.contains_key(&anchor.id) {
            return Err(StoreError::DuplicateId(anchor.id));
        }
        self.anchors.insert(anchor.id.clone(), anchor.clone());
        self.pending_events.push_back(StoreEvent::AnchorAdded(anchor));
        Ok(())
    }

    /// Remove an anchor by id, returning it.
    pub fn remove(&mut self, id: &AnchorId) -> Result<Anchor, StoreError> {
        let anchor = self
            .anchors
            .shift_remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        self.pending_events
            .push_back(StoreEvent::AnchorRemoved(anchor.id.clone()));
        Ok(anchor)
    }

    /// Snapshot of all anchors in insertion order.
    pub fn list(&self) -> Vec<Anchor> {
        self.anchors.values().cloned().collect()
    }

    /// Adopt a world map: its frame becomes active and its anchors replace
    /// the current set.
    ///
    /// All-or-nothing. A map listing the same id twice is rejected and the
    /// store is left exactly as it was.
    pub fn replace_all(&mut self, world_map: WorldMap) -> Result<(), StoreError> {
        let WorldMap { frame, anchors } = world_map;

        let mut incoming = IndexMap::with_capacity(anchors.len());
        for anchor in anchors {
            if incoming.contains_key(&anchor.id) {
                return Err(StoreError::DuplicateId(anchor.id));
            }
            incoming.insert(anchor.id.clone(), anchor);
        }

        let previous = std::mem::replace(&mut self.anchors, incoming);
        self.frame = Some(frame);

        self.pending_events.push_back(StoreEvent::Replaced {
            removed: previous.into_keys().collect(),
            added: self.list(),
        });
        Ok(())
    }

    /// Drop every anchor and the active frame.
    pub fn clear(&mut self) {
        let removed: Vec<AnchorId> = self.anchors.drain(..).map(|(id, _)| id).collect();
        self.frame = None;
        self.pending_events.push_back(StoreEvent::Cleared { removed });
    }

    pub fn get(&self, id: &AnchorId) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    pub fn contains(&self, id: &AnchorId) -> bool {
        self.anchors.contains_key(id)
    }

    /// The active spatial frame, if a world map has been adopted.
    pub fn frame(&self) -> Option<&SpatialFrame> {
        self.frame.as_ref()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Take all queued change notifications, oldest first.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        self.pending_events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Pose;

    fn card(id: &str, x: f64) -> Anchor {
        Anchor::with_id(AnchorId::from_string(id), "card", Pose::from_translation(x, 0.0, 0.0))
    }

    fn ids(store: &AnchorStore) -> Vec<String> {
        store.list().into_iter().map(|a| a.id.0).collect()
    }

    #[test]
    fn test_add_and_list_in_insertion_order() {
        let mut store = AnchorStore::new();
        store.add(card("c", 0.0)).unwrap();
        store.add(card("a", 1.0)).unwrap();
        store.add(card("b", 2.0)).unwrap();

        assert_eq!(ids(&store), vec!["c", "a", "b"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut store = AnchorStore::new();
        store.add(card("a", 0.0)).unwrap();

        let err = store.add(card("a", 5.0)).unwrap_err();
        assert_eq!(err, StoreError::DuplicateId(AnchorId::from_string("a")));
        // Original anchor untouched
        assert_eq!(store.get(&AnchorId::from_string("a")).unwrap().pose.translation()[0], 0.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_unknown_fails() {
        let mut store = AnchorStore::new();
        let err = store.remove(&AnchorId::from_string("ghost")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_remove_preserves_order_of_rest() {
        let mut store = AnchorStore::new();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            store.add(card(id, i as f64)).unwrap();
        }

        let removed = store.remove(&AnchorId::from_string("b")).unwrap();
        assert_eq!(removed.id.as_str(), "b");
        assert_eq!(ids(&store), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_replace_all_adopts_map() {
        let mut store = AnchorStore::new();
        store.add(card("x", 0.0)).unwrap();

        let map = WorldMap::new(
            SpatialFrame::new("frame-b", vec![9, 9]),
            vec![card("y", 1.0), card("z", 2.0)],
        );
        store.replace_all(map).unwrap();

        assert_eq!(ids(&store), vec!["y", "z"]);
        assert_eq!(store.frame().unwrap().id, "frame-b");
    }

    #[test]
    fn test_replace_all_with_duplicates_is_atomic() {
        let mut store = AnchorStore::new();
        store.add(card("x", 0.0)).unwrap();
        store.drain_events();

        let map = WorldMap::new(
            SpatialFrame::new("bad", vec![]),
            vec![card("y", 1.0), card("y", 2.0)],
        );
        assert!(store.replace_all(map).is_err());

        assert_eq!(ids(&store), vec!["x"]);
        assert!(store.frame().is_none());
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn test_empty_world_map_is_valid() {
        let mut store = AnchorStore::new();
        store.add(card("x", 0.0)).unwrap();

        store
            .replace_all(WorldMap::new(SpatialFrame::new("empty", vec![]), vec![]))
            .unwrap();
        assert!(store.is_empty());
        assert!(store.frame().is_some());
    }

    #[test]
    fn test_clear_drops_frame() {
        let mut store = AnchorStore::new();
        store
            .replace_all(WorldMap::new(SpatialFrame::new("f", vec![1]), vec![card("a", 0.0)]))
            .unwrap();
        store.clear();

        assert!(store.is_empty());
        assert!(store.frame().is_none());
    }

    #[test]
    fn test_events_follow_mutations() {
        let mut store = AnchorStore::new();
        store.add(card("a", 0.0)).unwrap();
        store.add(card("b", 1.0)).unwrap();
        store.remove(&AnchorId::from_string("a")).unwrap();
        store
            .replace_all(WorldMap::new(SpatialFrame::new("f", vec![]), vec![card("c", 2.0)]))
            .unwrap();

        let events = store.drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StoreEvent::AnchorAdded(a) if a.id.as_str() == "a"));
        assert!(matches!(&events[2], StoreEvent::AnchorRemoved(id) if id.as_str() == "a"));
        match &events[3] {
            StoreEvent::Replaced { removed, added } => {
                assert_eq!(removed, &vec![AnchorId::from_string("b")]);
                assert_eq!(added.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(store.drain_events().is_empty());
    }
}
