//! Reconciliation engine: applies local intent and remote messages to the
//! anchor store.
//!
//! The engine is a two-state machine. A device starts `Unsynced`, becomes
//! `Synced` when it adopts a peer's world map, and returns to `Unsynced` on
//! a tracking reset. Re-localization itself is the tracking subsystem's job;
//! the engine only records whose frame was adopted.
//!
//! World map snapshots are last-writer-wins by arrival order: each one fully
//! replaces the store, with no merge. Anchor deltas are applied individually;
//! a duplicate add or a remove of an unknown id is treated as redelivery and
//! silently dropped.

use crate::codec::{self, AnchorDelta, EncodeError, ReplicationMessage};
use crate::error::Result;
use crate::network::PeerIdentity;
use cardify_core::{
    Anchor, AnchorId, AnchorStore, Fingerprint, Pose, SpatialFrame, StoreError, StoreEvent,
    WorldMap,
};
use tracing::{debug, info};

/// Whether this device has adopted another peer's spatial frame.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsynced,
    Synced {
        provider: PeerIdentity,
        fingerprint: Fingerprint,
    },
}

/// What applying an inbound message did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciled {
    MapAdopted {
        provider: PeerIdentity,
        anchor_count: usize,
        fingerprint: Fingerprint,
    },
    AnchorAdded(AnchorId),
    AnchorRemoved(AnchorId),
    DuplicateIgnored(AnchorId),
    MissingIgnored(AnchorId),
}

/// A local change together with the payload announcing it to peers.
#[derive(Clone, Debug)]
pub struct Outbound<T> {
    pub value: T,
    pub payloads: Vec<Vec<u8>>,
}

/// Result of a drag-to-move: the discarded anchor and its replacement.
#[derive(Clone, Debug, PartialEq)]
pub struct Moved {
    pub removed: Anchor,
    pub added: Anchor,
}

/// Owns the anchor store and the sync state machine.
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    store: AnchorStore,
    state: SyncState,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &AnchorStore {
        &self.store
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.state, SyncState::Synced { .. })
    }

    /// The peer whose world map is currently active, if any.
    pub fn map_provider(&self) -> Option<&PeerIdentity> {
        match &self.state {
            SyncState::Synced { provider, .. } => Some(provider),
            SyncState::Unsynced => None,
        }
    }

    /// Store notifications queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        self.store.drain_events()
    }

    /// Decode and apply a payload received from `from`.
    ///
    /// Decode errors and rejected snapshots come back as `Err`; the store is
    /// untouched in that case.
    pub fn apply_inbound(&mut self, from: &PeerIdentity, payload: &[u8]) -> Result<Reconciled> {
        let message = codec::decode(payload)?;
        self.apply_message(from, message)
    }

    pub fn apply_message(
        &mut self,
        from: &PeerIdentity,
        message: ReplicationMessage,
    ) -> Result<Reconciled> {
        match message {
            ReplicationMessage::WorldMapSnapshot(map) => self.adopt_world_map(from, map),
            ReplicationMessage::AnchorDelta(AnchorDelta::Add(anchor)) => {
                let id = anchor.id.clone();
                match self.store.add(anchor) {
                    Ok(()) => {
                        debug!(peer = %from.id, anchor = %id, "remote anchor added");
                        Ok(Reconciled::AnchorAdded(id))
                    }
                    Err(StoreError::DuplicateId(_)) => {
                        debug!(peer = %from.id, anchor = %id, "duplicate add ignored");
                        Ok(Reconciled::DuplicateIgnored(id))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ReplicationMessage::AnchorDelta(AnchorDelta::Remove(id)) => {
                match self.store.remove(&id) {
                    Ok(_) => {
                        debug!(peer = %from.id, anchor = %id, "remote anchor removed");
                        Ok(Reconciled::AnchorRemoved(id))
                    }
                    Err(StoreError::NotFound(_)) => {
                        debug!(peer = %from.id, anchor = %id, "remove of unknown anchor ignored");
                        Ok(Reconciled::MissingIgnored(id))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn adopt_world_map(&mut self, from: &PeerIdentity, map: WorldMap) -> Result<Reconciled> {
        let fingerprint = map.fingerprint();
        let anchor_count = map.anchors.len();

        self.store.replace_all(map)?;

        if let SyncState::Synced { provider, .. } = &self.state {
            info!(previous = %provider.id, "superseding previously adopted world map");
        }
        self.state = SyncState::Synced {
            provider: from.clone(),
            fingerprint,
        };
        info!(
            peer = %from.id,
            anchors = anchor_count,
            map = %fingerprint.short(),
            "adopted world map"
        );

        Ok(Reconciled::MapAdopted {
            provider: from.clone(),
            anchor_count,
            fingerprint,
        })
    }

    /// Place a new anchor locally and produce the add delta for peers.
    ///
    /// Poses that could never be sent are refused before the store changes.
    pub fn place_local(&mut self, label: &str, pose: Pose) -> Result<Outbound<Anchor>> {
        let anchor = Anchor::new(label, pose);
        if !pose.is_finite() {
            return Err(EncodeError::NonFinitePose(anchor.id).into());
        }

        self.store.add(anchor.clone())?;
        let payload = codec::encode(&ReplicationMessage::add(anchor.clone()))?;
        debug!(anchor = %anchor.id, "local anchor placed");

        Ok(Outbound {
            value: anchor,
            payloads: vec![payload],
        })
    }

    /// Remove an anchor locally and produce the remove delta for peers.
    pub fn remove_local(&mut self, id: &AnchorId) -> Result<Outbound<Anchor>> {
        let removed = self.store.remove(id)?;
        let payload = codec::encode(&ReplicationMessage::remove(removed.id.clone()))?;
        debug!(anchor = %removed.id, "local anchor removed");

        Ok(Outbound {
            value: removed,
            payloads: vec![payload],
        })
    }

    /// Drag-to-move: remove the anchor and add a new one (fresh id, same
    /// label) at `pose`.
    pub fn move_local(&mut self, id: &AnchorId, pose: Pose) -> Result<Outbound<Moved>> {
        if !pose.is_finite() {
            return Err(EncodeError::NonFinitePose(id.clone()).into());
        }

        let removed = self.store.remove(id)?;
        let added = removed.relocated(pose);
        self.store.add(added.clone())?;

        let payloads = vec![
            codec::encode(&ReplicationMessage::remove(removed.id.clone()))?,
            codec::encode(&ReplicationMessage::add(added.clone()))?,
        ];
        debug!(from = %removed.id, to = %added.id, "local anchor moved");

        Ok(Outbound {
            value: Moved { removed, added },
            payloads,
        })
    }

    /// Assemble a world map from `frame` and the current anchors.
    ///
    /// Sharing does not change this device's own sync state.
    pub fn capture_world_map(&self, frame: SpatialFrame) -> Result<Outbound<WorldMap>> {
        let map = WorldMap::new(frame, self.store.list());
        let payload = codec::encode(&ReplicationMessage::snapshot(map.clone()))?;

        Ok(Outbound {
            value: map,
            payloads: vec![payload],
        })
    }

    /// Tracking reset: drop every anchor, the active frame and provenance.
    pub fn reset(&mut self) {
        self.store.clear();
        if let SyncState::Synced { provider, .. } = &self.state {
            info!(provider = %provider.id, "tracking reset, leaving shared map");
        }
        self.state = SyncState::Unsynced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use cardify_core::DEFAULT_LABEL;

    fn alice() -> PeerIdentity {
        PeerIdentity::new("peer-a", "Alice")
    }

    fn bob() -> PeerIdentity {
        PeerIdentity::new("peer-b", "Bob")
    }

    fn card(id: &str, x: f64) -> Anchor {
        Anchor::with_id(AnchorId::from_string(id), "card", Pose::from_translation(x, 0.0, -1.0))
    }

    fn snapshot(frame: &str, anchors: Vec<Anchor>) -> Vec<u8> {
        codec::encode(&ReplicationMessage::snapshot(WorldMap::new(
            SpatialFrame::new(frame, vec![1, 2, 3]),
            anchors,
        )))
        .unwrap()
    }

    fn ids(engine: &ReconciliationEngine) -> Vec<String> {
        engine.store().list().into_iter().map(|a| a.id.0).collect()
    }

    #[test]
    fn test_snapshot_replaces_local_state() {
        let mut engine = ReconciliationEngine::new();
        engine.apply_message(&alice(), ReplicationMessage::add(card("x", 0.0))).unwrap();

        let outcome = engine
            .apply_inbound(&bob(), &snapshot("b", vec![card("y", 1.0), card("z", 2.0)]))
            .unwrap();

        assert!(matches!(outcome, Reconciled::MapAdopted { anchor_count: 2, .. }));
        assert_eq!(ids(&engine), vec!["y", "z"]);
        assert_eq!(engine.map_provider(), Some(&bob()));
        assert_eq!(engine.store().frame().unwrap().id, "b");
    }

    #[test]
    fn test_last_snapshot_wins() {
        let mut engine = ReconciliationEngine::new();
        engine.apply_inbound(&alice(), &snapshot("s1", vec![card("a", 0.0)])).unwrap();
        engine
            .apply_inbound(&bob(), &snapshot("s2", vec![card("b", 1.0), card("c", 2.0)]))
            .unwrap();

        let mut fresh = ReconciliationEngine::new();
        fresh
            .apply_inbound(&bob(), &snapshot("s2", vec![card("b", 1.0), card("c", 2.0)]))
            .unwrap();

        assert_eq!(engine.store().list(), fresh.store().list());
        assert_eq!(engine.state(), fresh.state());
    }

    #[test]
    fn test_duplicate_add_is_silent() {
        let mut engine = ReconciliationEngine::new();
        let add = codec::encode(&ReplicationMessage::add(card("card-1", 0.5))).unwrap();

        assert_eq!(
            engine.apply_inbound(&alice(), &add).unwrap(),
            Reconciled::AnchorAdded(AnchorId::from_string("card-1"))
        );
        let once = engine.store().list();

        assert_eq!(
            engine.apply_inbound(&alice(), &add).unwrap(),
            Reconciled::DuplicateIgnored(AnchorId::from_string("card-1"))
        );
        assert_eq!(engine.store().list(), once);
    }

    #[test]
    fn test_remove_unknown_is_silent() {
        let mut engine = ReconciliationEngine::new();
        let outcome = engine
            .apply_message(&alice(), ReplicationMessage::remove(AnchorId::from_string("ghost")))
            .unwrap();
        assert_eq!(outcome, Reconciled::MissingIgnored(AnchorId::from_string("ghost")));
    }

    #[test]
    fn test_malformed_payload_leaves_state() {
        let mut engine = ReconciliationEngine::new();
        engine.apply_message(&alice(), ReplicationMessage::add(card("x", 0.0))).unwrap();
        let before = engine.store().list();

        let err = engine.apply_inbound(&bob(), b"{\"version\":1,\"message\":42}").unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
        assert_eq!(engine.store().list(), before);
        assert!(!engine.is_synced());
    }

    #[test]
    fn test_snapshot_with_duplicate_ids_rejected() {
        let mut engine = ReconciliationEngine::new();
        engine.apply_message(&alice(), ReplicationMessage::add(card("x", 0.0))).unwrap();

        let err = engine
            .apply_inbound(&bob(), &snapshot("dup", vec![card("y", 0.0), card("y", 1.0)]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::DuplicateId(_))));
        assert_eq!(ids(&engine), vec!["x"]);
        assert_eq!(engine.state(), &SyncState::Unsynced);
    }

    #[test]
    fn test_place_local_produces_add() {
        let mut engine = ReconciliationEngine::new();
        let out = engine
            .place_local(DEFAULT_LABEL, Pose::from_translation(0.0, 0.0, -0.5))
            .unwrap();

        assert_eq!(out.payloads.len(), 1);
        assert_eq!(
            codec::decode(&out.payloads[0]).unwrap(),
            ReplicationMessage::add(out.value.clone())
        );
        assert!(engine.store().contains(&out.value.id));
    }

    #[test]
    fn test_place_local_rejects_non_finite_pose() {
        let mut engine = ReconciliationEngine::new();
        let err = engine
            .place_local("card", Pose::from_translation(f64::NAN, 0.0, 0.0))
            .unwrap_err();

        assert!(matches!(err, SyncError::Encode(EncodeError::NonFinitePose(_))));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_remove_local_unknown_fails() {
        let mut engine = ReconciliationEngine::new();
        let err = engine.remove_local(&AnchorId::from_string("nope")).unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn test_move_is_remove_then_add() {
        let mut engine = ReconciliationEngine::new();
        let placed = engine.place_local("card", Pose::identity()).unwrap().value;

        let out = engine
            .move_local(&placed.id, Pose::from_translation(1.0, 0.0, 0.0))
            .unwrap();
        let Moved { removed, added } = out.value;

        assert_eq!(removed.id, placed.id);
        assert_ne!(added.id, placed.id);
        assert_eq!(added.label, "card");
        assert_eq!(ids(&engine), vec![added.id.0.clone()]);

        assert_eq!(
            codec::decode(&out.payloads[0]).unwrap(),
            ReplicationMessage::remove(placed.id.clone())
        );
        assert_eq!(
            codec::decode(&out.payloads[1]).unwrap(),
            ReplicationMessage::add(added)
        );
    }

    #[test]
    fn test_capture_world_map_keeps_sync_state() {
        let mut engine = ReconciliationEngine::new();
        engine.place_local("card", Pose::identity()).unwrap();

        let out = engine
            .capture_world_map(SpatialFrame::new("mine", vec![7]))
            .unwrap();
        assert_eq!(out.value.anchors, engine.store().list());
        assert!(!engine.is_synced());
    }

    #[test]
    fn test_reset_clears_provider() {
        let mut engine = ReconciliationEngine::new();
        engine.apply_inbound(&bob(), &snapshot("b", vec![card("y", 0.0)])).unwrap();
        assert!(engine.is_synced());

        engine.reset();
        assert_eq!(engine.map_provider(), None);
        assert!(engine.store().is_empty());
        assert!(engine.store().frame().is_none());
    }
}
