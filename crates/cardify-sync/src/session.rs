//! Session controller: tracking state, the map-sharing gate and the
//! user-facing status line.

use crate::network::{PeerIdentity, SendError};
use crate::tracking::{LimitedReason, MappingStatus, TrackingEvent, TrackingQuality};
use std::fmt;

/// The single status message shown to the user.
///
/// Variants are listed in priority order; [`SessionController::status`]
/// picks the first that applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMessage {
    SessionFailed { reason: String },
    Interrupted,
    InterruptionEnded,
    NoPeersNoAnchors,
    ConnectedAwaitingMap { peers: Vec<String> },
    TrackingUnavailable,
    ExcessiveMotion,
    InsufficientFeatures,
    MapReceived { provider: String },
    Relocalizing,
    Initializing,
    Nominal,
}

impl StatusMessage {
    /// Nominal state shows no message at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, StatusMessage::Nominal)
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMessage::SessionFailed { reason } => write!(f, "Session failed: {}", reason),
            StatusMessage::Interrupted => write!(f, "Session was interrupted"),
            StatusMessage::InterruptionEnded => write!(f, "Session interruption ended"),
            StatusMessage::NoPeersNoAnchors => write!(
                f,
                "Move around to map the environment, or wait to join a shared session."
            ),
            StatusMessage::ConnectedAwaitingMap { peers } => {
                write!(f, "Connected with {}.", peers.join(", "))
            }
            StatusMessage::TrackingUnavailable => write!(f, "Tracking unavailable."),
            StatusMessage::ExcessiveMotion => {
                write!(f, "Tracking limited - Move the device more slowly.")
            }
            StatusMessage::InsufficientFeatures => write!(
                f,
                "Tracking limited - Point the device at an area with visible surface detail, \
                 or improve lighting conditions."
            ),
            StatusMessage::MapReceived { provider } => {
                write!(f, "Received map from {}.", provider)
            }
            StatusMessage::Relocalizing => write!(
                f,
                "Resuming session - move to where you were when the session was interrupted."
            ),
            StatusMessage::Initializing => write!(f, "Initializing AR session."),
            StatusMessage::Nominal => Ok(()),
        }
    }
}

/// Why map sharing is currently disabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShareBlock {
    InsufficientMapping {
        current: MappingStatus,
        required: MappingStatus,
    },
    NoPeers,
    TransportDown,
}

impl fmt::Display for ShareBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareBlock::InsufficientMapping { current, required } => write!(
                f,
                "mapping status {} is below {}",
                current, required
            ),
            ShareBlock::NoPeers => write!(f, "no connected peers"),
            ShareBlock::TransportDown => write!(f, "transport is down"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interruption {
    None,
    Active,
    Ended,
}

/// Tracks session-level state reported by tracking and transport.
#[derive(Clone, Debug)]
pub struct SessionController {
    share_threshold: MappingStatus,
    quality: TrackingQuality,
    mapping_status: MappingStatus,
    interruption: Interruption,
    failure: Option<String>,
    peers: Vec<PeerIdentity>,
    transport_down: bool,
}

impl SessionController {
    pub fn new(
        share_threshold: MappingStatus,
        quality: TrackingQuality,
        mapping_status: MappingStatus,
    ) -> Self {
        Self {
            share_threshold,
            quality,
            mapping_status,
            interruption: Interruption::None,
            failure: None,
            peers: Vec::new(),
            transport_down: false,
        }
    }

    pub fn quality(&self) -> TrackingQuality {
        self.quality
    }

    pub fn mapping_status(&self) -> MappingStatus {
        self.mapping_status
    }

    pub fn peers(&self) -> &[PeerIdentity] {
        &self.peers
    }

    pub fn on_tracking_event(&mut self, event: &TrackingEvent) {
        match event {
            TrackingEvent::QualityChanged(quality) => {
                self.quality = *quality;
                self.settle_interruption();
            }
            TrackingEvent::FrameUpdated { mapping_status } => {
                self.mapping_status = *mapping_status;
                self.settle_interruption();
            }
            TrackingEvent::Interrupted => self.interruption = Interruption::Active,
            TrackingEvent::InterruptionEnded => self.interruption = Interruption::Ended,
            TrackingEvent::Failed { reason } => self.failure = Some(reason.clone()),
        }
    }

    // "Interruption ended" stays up only until the next tracking update.
    fn settle_interruption(&mut self) {
        if self.interruption == Interruption::Ended {
            self.interruption = Interruption::None;
        }
    }

    /// Replace the known peer set. Returns whether it changed.
    pub fn set_peers(&mut self, peers: Vec<PeerIdentity>) -> bool {
        if peers == self.peers {
            return false;
        }
        self.peers = peers;
        self.transport_down = false;
        true
    }

    /// Feed back the outcome of a broadcast.
    pub fn record_send_result(&mut self, result: &Result<(), SendError>) {
        match result {
            Ok(()) | Err(SendError::NoPeers) => self.transport_down = false,
            Err(SendError::TransportDown(_)) => self.transport_down = true,
        }
    }

    /// Back to a fresh tracking session.
    pub fn reset(&mut self) {
        self.quality = TrackingQuality::Limited(LimitedReason::Initializing);
        self.mapping_status = MappingStatus::NotAvailable;
        self.interruption = Interruption::None;
        self.failure = None;
    }

    /// Whether the user may share the world map right now.
    pub fn share_gate(&self) -> Result<(), ShareBlock> {
        if self.mapping_status < self.share_threshold {
            return Err(ShareBlock::InsufficientMapping {
                current: self.mapping_status,
                required: self.share_threshold,
            });
        }
        if self.peers.is_empty() {
            return Err(ShareBlock::NoPeers);
        }
        if self.transport_down {
            return Err(ShareBlock::TransportDown);
        }
        Ok(())
    }

    pub fn can_share_map(&self) -> bool {
        self.share_gate().is_ok()
    }

    /// Pick the status message by strict priority.
    pub fn status(&self, anchor_count: usize, map_provider: Option<&PeerIdentity>) -> StatusMessage {
        if let Some(reason) = &self.failure {
            return StatusMessage::SessionFailed {
                reason: reason.clone(),
            };
        }
        match self.interruption {
            Interruption::Active => return StatusMessage::Interrupted,
            Interruption::Ended => return StatusMessage::InterruptionEnded,
            Interruption::None => {}
        }

        use LimitedReason::*;
        match self.quality {
            TrackingQuality::Normal if anchor_count == 0 && self.peers.is_empty() => {
                StatusMessage::NoPeersNoAnchors
            }
            TrackingQuality::Normal if !self.peers.is_empty() && map_provider.is_none() => {
                StatusMessage::ConnectedAwaitingMap {
                    peers: self.peers.iter().map(|p| p.display_name.clone()).collect(),
                }
            }
            TrackingQuality::NotAvailable => StatusMessage::TrackingUnavailable,
            TrackingQuality::Limited(ExcessiveMotion) => StatusMessage::ExcessiveMotion,
            TrackingQuality::Limited(InsufficientFeatures) => StatusMessage::InsufficientFeatures,
            TrackingQuality::Limited(Initializing | Relocalizing) if map_provider.is_some() => {
                StatusMessage::MapReceived {
                    provider: map_provider
                        .map(|p| p.display_name.clone())
                        .unwrap_or_default(),
                }
            }
            TrackingQuality::Limited(Relocalizing) => StatusMessage::Relocalizing,
            TrackingQuality::Limited(Initializing) => StatusMessage::Initializing,
            TrackingQuality::Normal => StatusMessage::Nominal,
        }
    }
}
