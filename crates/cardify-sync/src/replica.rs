//! Replica coordinator.
//!
//! A replica is one device's participation in a shared session. All of its
//! mutable state (the reconciliation engine and the session controller) is
//! owned by a single tokio task. Local user actions, payloads from the
//! transport and tracking notifications all become [`Command`]s on one
//! queue, so no two mutations ever interleave. Transport and tracking
//! callbacks do nothing but enqueue.
//!
//! Observers never touch that state directly. They read the latest
//! [`ReplicaView`] from a watch channel, or subscribe to store events to
//! materialize and destroy rendered objects.

use crate::config::ReplicaConfig;
use crate::error::{Result, SyncError};
use crate::network::{PeerIdentity, PeerTransport, SendError};
use crate::reconcile::{Moved, Outbound, Reconciled, ReconciliationEngine, SyncState};
use crate::session::{SessionController, StatusMessage};
use crate::tracking::{MappingStatus, TrackingEvent, TrackingQuality, TrackingSource};
use cardify_core::{Anchor, AnchorId, Pose, StoreEvent, WorldMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Read-only snapshot of a replica's state, for UI and tests.
#[derive(Clone, Debug)]
pub struct ReplicaView {
    pub local_peer: PeerIdentity,
    pub anchors: Vec<Anchor>,
    pub sync: SyncState,
    pub quality: TrackingQuality,
    pub mapping_status: MappingStatus,
    pub peers: Vec<PeerIdentity>,
    pub status: StatusMessage,
    pub can_share_map: bool,
}

impl ReplicaView {
    pub fn map_provider(&self) -> Option<&PeerIdentity> {
        match &self.sync {
            SyncState::Synced { provider, .. } => Some(provider),
            SyncState::Unsynced => None,
        }
    }

    pub fn anchor_ids(&self) -> Vec<AnchorId> {
        self.anchors.iter().map(|a| a.id.clone()).collect()
    }
}

/// Outcome of a local action.
///
/// The local change is always applied. `broadcast` reports whether it could
/// be handed to the transport; a failure there is never rolled back.
#[derive(Clone, Debug)]
pub struct LocalChange<T> {
    pub value: T,
    pub broadcast: std::result::Result<(), SendError>,
}

enum Command {
    Place {
        label: Option<String>,
        pose: Pose,
        reply: oneshot::Sender<Result<LocalChange<Anchor>>>,
    },
    Remove {
        id: AnchorId,
        reply: oneshot::Sender<Result<LocalChange<Anchor>>>,
    },
    Move {
        id: AnchorId,
        pose: Pose,
        reply: oneshot::Sender<Result<LocalChange<Moved>>>,
    },
    ShareMap {
        reply: oneshot::Sender<Result<LocalChange<WorldMap>>>,
    },
    ResetTracking {
        reply: oneshot::Sender<()>,
    },
    Inbound {
        from: PeerIdentity,
        payload: Vec<u8>,
    },
    Tracking(TrackingEvent),
    Settle {
        reply: oneshot::Sender<ReplicaView>,
    },
    Shutdown,
}

/// The task-owned state of one device.
pub struct Replica<T: PeerTransport, K: TrackingSource> {
    config: ReplicaConfig,
    local: PeerIdentity,
    transport: Arc<T>,
    tracking: Arc<K>,
    engine: ReconciliationEngine,
    session: SessionController,
    view_tx: watch::Sender<ReplicaView>,
    store_tx: broadcast::Sender<StoreEvent>,
}

impl<T: PeerTransport, K: TrackingSource> Replica<T, K> {
    /// Start a replica on the current tokio runtime.
    ///
    /// Registers itself as the transport's receive handler and the tracking
    /// source's event handler. The task stops on `shutdown` or when the last
    /// [`ReplicaHandle`] is dropped.
    pub fn spawn(config: ReplicaConfig, transport: Arc<T>, tracking: Arc<K>) -> ReplicaHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let local = transport.local_peer();

        let engine = ReconciliationEngine::new();
        let session = SessionController::new(
            config.share_threshold,
            tracking.current_quality(),
            tracking.current_mapping_status(),
        );
        let (view_tx, view_rx) = watch::channel(Self::make_view(&local, &engine, &session));
        let (store_tx, _) = broadcast::channel(config.store_event_buffer.max(1));

        // Callbacks hold weak senders so the task ends once every handle
        // is dropped, even though it owns the transport and tracking source.
        let inbound = command_tx.downgrade();
        transport.on_receive(Arc::new(move |from: PeerIdentity, payload: Vec<u8>| {
            if let Some(tx) = inbound.upgrade() {
                let _ = tx.send(Command::Inbound { from, payload });
            }
        }));
        let events = command_tx.downgrade();
        tracking.on_event(Arc::new(move |event: TrackingEvent| {
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Command::Tracking(event));
            }
        }));

        let handle = ReplicaHandle {
            local: local.clone(),
            render_prefix: config.render_prefix.clone(),
            commands: command_tx,
            view: view_rx,
            store_events: store_tx.clone(),
        };

        let replica = Replica {
            config,
            local,
            transport,
            tracking,
            engine,
            session,
            view_tx,
            store_tx,
        };
        tokio::spawn(replica.run(command_rx));

        handle
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(peer = %self.local.id, "replica started");
        self.refresh_peers().await;
        self.publish();

        while let Some(command) = commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command).await;
            self.publish();
        }

        info!(peer = %self.local.id, "replica stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Place { label, pose, reply } => {
                let label = label.unwrap_or_else(|| self.config.placement_label.clone());
                let result = match self.engine.place_local(&label, pose) {
                    Ok(out) => Ok(self.announce(out).await),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Remove { id, reply } => {
                let result = match self.engine.remove_local(&id) {
                    Ok(out) => Ok(self.announce(out).await),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Move { id, pose, reply } => {
                let result = match self.engine.move_local(&id, pose) {
                    Ok(out) => Ok(self.announce(out).await),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::ShareMap { reply } => {
                self.refresh_peers().await;
                let result = self.share_map().await;
                if let Err(e) = &result {
                    warn!(peer = %self.local.id, error = %e, "world map not shared");
                }
                let _ = reply.send(result);
            }
            Command::ResetTracking { reply } => {
                self.tracking.request_reset();
                self.engine.reset();
                self.session.reset();
                let _ = reply.send(());
            }
            Command::Inbound { from, payload } => self.receive(from, &payload),
            Command::Tracking(event) => {
                if let TrackingEvent::Failed { reason } = &event {
                    warn!(peer = %self.local.id, %reason, "tracking session failed");
                }
                self.session.on_tracking_event(&event);
            }
            Command::Settle { reply } => {
                self.refresh_peers().await;
                let _ = reply.send(self.view());
                return;
            }
            Command::Shutdown => return,
        }
        self.refresh_peers().await;
    }

    fn receive(&mut self, from: PeerIdentity, payload: &[u8]) {
        match self.engine.apply_inbound(&from, payload) {
            Ok(Reconciled::MapAdopted { .. }) => {
                debug!(peer = %self.local.id, provider = %from.id, "now synced");
                if let Some(frame) = self.engine.store().frame() {
                    self.tracking.relocalize(frame);
                    // The tracking callback queues behind this command.
                    let quality = self.tracking.current_quality();
                    self.session
                        .on_tracking_event(&TrackingEvent::QualityChanged(quality));
                }
            }
            Ok(outcome) => debug!(peer = %self.local.id, ?outcome, "reconciled"),
            Err(e) => warn!(
                peer = %self.local.id,
                from = %from.id,
                error = %e,
                "dropping inbound message"
            ),
        }
    }

    async fn share_map(&mut self) -> Result<LocalChange<WorldMap>> {
        self.session.share_gate().map_err(SyncError::SharingBlocked)?;
        let frame = self.tracking.capture_frame()?;
        let out = self.engine.capture_world_map(frame)?;
        info!(
            peer = %self.local.id,
            anchors = out.value.anchors.len(),
            map = %out.value.fingerprint().short(),
            "sharing world map"
        );
        Ok(self.announce(out).await)
    }

    /// Send every payload of a local change. No retries.
    async fn announce<V>(&mut self, out: Outbound<V>) -> LocalChange<V> {
        let mut broadcast = Ok(());
        for payload in &out.payloads {
            let result = self.transport.send_to_all(payload).await;
            self.session.record_send_result(&result);
            if let Err(e) = result {
                debug!(peer = %self.local.id, error = %e, "broadcast failed, keeping local change");
                if broadcast.is_ok() {
                    broadcast = Err(e);
                }
            }
        }
        LocalChange {
            value: out.value,
            broadcast,
        }
    }

    async fn refresh_peers(&mut self) {
        let peers = self.transport.connected_peers().await;
        if self.session.set_peers(peers) {
            debug!(peer = %self.local.id, peers = self.session.peers().len(), "peer set changed");
        }
    }

    fn publish(&mut self) {
        for event in self.engine.drain_events() {
            let _ = self.store_tx.send(event);
        }
        self.view_tx.send_replace(self.view());
    }

    fn view(&self) -> ReplicaView {
        Self::make_view(&self.local, &self.engine, &self.session)
    }

    fn make_view(
        local: &PeerIdentity,
        engine: &ReconciliationEngine,
        session: &SessionController,
    ) -> ReplicaView {
        ReplicaView {
            local_peer: local.clone(),
            anchors: engine.store().list(),
            sync: engine.state().clone(),
            quality: session.quality(),
            mapping_status: session.mapping_status(),
            peers: session.peers().to_vec(),
            status: session.status(engine.store().len(), engine.map_provider()),
            can_share_map: session.can_share_map(),
        }
    }
}

/// Cloneable handle to a running replica.
#[derive(Clone)]
pub struct ReplicaHandle {
    local: PeerIdentity,
    render_prefix: String,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ReplicaView>,
    store_events: broadcast::Sender<StoreEvent>,
}

impl ReplicaHandle {
    pub fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SyncError::ReplicaClosed)?;
        response.await.map_err(|_| SyncError::ReplicaClosed)
    }

    /// Place an anchor with the configured label.
    pub async fn place(&self, pose: Pose) -> Result<LocalChange<Anchor>> {
        self.request(|reply| Command::Place {
            label: None,
            pose,
            reply,
        })
        .await?
    }

    pub async fn place_labeled(
        &self,
        label: impl Into<String>,
        pose: Pose,
    ) -> Result<LocalChange<Anchor>> {
        let label = Some(label.into());
        self.request(|reply| Command::Place { label, pose, reply })
            .await?
    }

    pub async fn remove(&self, id: &AnchorId) -> Result<LocalChange<Anchor>> {
        let id = id.clone();
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    /// Drag-to-move. The anchor is replaced by a new one with a fresh id.
    pub async fn move_anchor(&self, id: &AnchorId, pose: Pose) -> Result<LocalChange<Moved>> {
        let id = id.clone();
        self.request(|reply| Command::Move { id, pose, reply })
            .await?
    }

    /// Capture and broadcast the world map, if the share gate is open.
    pub async fn share_map(&self) -> Result<LocalChange<WorldMap>> {
        self.request(|reply| Command::ShareMap { reply }).await?
    }

    pub async fn reset_tracking(&self) -> Result<()> {
        self.request(|reply| Command::ResetTracking { reply }).await
    }

    /// Wait until everything queued before this call has been applied, then
    /// return the resulting view.
    pub async fn settle(&self) -> Result<ReplicaView> {
        self.request(|reply| Command::Settle { reply }).await
    }

    /// Latest published view.
    pub fn view(&self) -> ReplicaView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ReplicaView> {
        self.view.clone()
    }

    /// Store change notifications for the rendering layer.
    pub fn subscribe_store(&self) -> broadcast::Receiver<StoreEvent> {
        self.store_events.subscribe()
    }

    /// Anchors the rendering layer should show.
    pub fn renderable_anchors(&self) -> Vec<Anchor> {
        self.view
            .borrow()
            .anchors
            .iter()
            .filter(|a| a.is_renderable(&self.render_prefix))
            .cloned()
            .collect()
    }

    /// Stop the replica task. Further requests fail with `ReplicaClosed`.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
