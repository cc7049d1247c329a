//! Tracking subsystem interface.
//!
//! Pose tracking and environment mapping happen outside this crate. The
//! session only needs to hear about quality changes, mapping progress and
//! interruptions, to capture the current spatial frame when the user shares
//! the map, and to ask for a reset.

use cardify_core::SpatialFrame;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Why tracking is currently limited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitedReason {
    Initializing,
    Relocalizing,
    ExcessiveMotion,
    InsufficientFeatures,
}

/// How well the device currently knows where it is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingQuality {
    NotAvailable,
    Limited(LimitedReason),
    Normal,
}

impl std::fmt::Display for TrackingQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingQuality::NotAvailable => write!(f, "Not Available"),
            TrackingQuality::Limited(reason) => write!(f, "Limited ({:?})", reason),
            TrackingQuality::Normal => write!(f, "Normal"),
        }
    }
}

/// How much of the surroundings has been mapped. Ordered from worst to best.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MappingStatus {
    NotAvailable,
    Limited,
    Extending,
    Mapped,
}

impl std::fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingStatus::NotAvailable => write!(f, "Not Available"),
            MappingStatus::Limited => write!(f, "Limited"),
            MappingStatus::Extending => write!(f, "Extending"),
            MappingStatus::Mapped => write!(f, "Mapped"),
        }
    }
}

/// Notifications from the tracking subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackingEvent {
    QualityChanged(TrackingQuality),
    FrameUpdated { mapping_status: MappingStatus },
    Interrupted,
    InterruptionEnded,
    Failed { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("World map unavailable: {0}")]
    MapUnavailable(String),
}

/// Callback for tracking notifications.
pub type TrackingHandler = Arc<dyn Fn(TrackingEvent) + Send + Sync>;

/// Capabilities the session needs from the tracking subsystem.
pub trait TrackingSource: Send + Sync + 'static {
    fn current_quality(&self) -> TrackingQuality;

    fn current_mapping_status(&self) -> MappingStatus;

    /// Register the notification handler, replacing any previous one.
    fn on_event(&self, handler: TrackingHandler);

    /// Capture the current spatial frame for a world map.
    fn capture_frame(&self) -> Result<SpatialFrame, TrackingError>;

    /// Restart tracking from scratch, discarding the current frame.
    fn request_reset(&self);

    /// Restart tracking against an adopted peer frame. Tracking reports
    /// `Limited(Relocalizing)` until it recognizes the surroundings.
    fn relocalize(&self, frame: &SpatialFrame);
}

struct SimulatedState {
    quality: TrackingQuality,
    mapping_status: MappingStatus,
    adopted_frame: Option<String>,
}

/// Scriptable tracking source for tests and demos.
///
/// Setters update the simulated state and notify the registered handler,
/// exactly as a real tracking session would.
pub struct SimulatedTracking {
    state: RwLock<SimulatedState>,
    handler: RwLock<Option<TrackingHandler>>,
    frames_captured: AtomicU64,
    resets: AtomicU64,
}

impl SimulatedTracking {
    /// A session that has just started.
    pub fn new() -> Self {
        Self::with_state(
            TrackingQuality::Limited(LimitedReason::Initializing),
            MappingStatus::NotAvailable,
        )
    }

    /// A session that is tracking normally over a well-mapped area.
    pub fn mapped() -> Self {
        Self::with_state(TrackingQuality::Normal, MappingStatus::Mapped)
    }

    pub fn with_state(quality: TrackingQuality, mapping_status: MappingStatus) -> Self {
        Self {
            state: RwLock::new(SimulatedState {
                quality,
                mapping_status,
                adopted_frame: None,
            }),
            handler: RwLock::new(None),
            frames_captured: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    fn emit(&self, event: TrackingEvent) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn set_quality(&self, quality: TrackingQuality) {
        self.state.write().quality = quality;
        self.emit(TrackingEvent::QualityChanged(quality));
    }

    pub fn set_mapping_status(&self, mapping_status: MappingStatus) {
        self.state.write().mapping_status = mapping_status;
        self.emit(TrackingEvent::FrameUpdated { mapping_status });
    }

    pub fn interrupt(&self) {
        self.emit(TrackingEvent::Interrupted);
    }

    pub fn end_interruption(&self) {
        self.emit(TrackingEvent::InterruptionEnded);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.emit(TrackingEvent::Failed {
            reason: reason.into(),
        });
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Id of the peer frame tracking was last restarted against.
    pub fn adopted_frame(&self) -> Option<String> {
        self.state.read().adopted_frame.clone()
    }
}

impl Default for SimulatedTracking {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingSource for SimulatedTracking {
    fn current_quality(&self) -> TrackingQuality {
        self.state.read().quality
    }

    fn current_mapping_status(&self) -> MappingStatus {
        self.state.read().mapping_status
    }

    fn on_event(&self, handler: TrackingHandler) {
        *self.handler.write() = Some(handler);
    }

    fn capture_frame(&self) -> Result<SpatialFrame, TrackingError> {
        let mapping_status = self.state.read().mapping_status;
        if mapping_status == MappingStatus::NotAvailable {
            return Err(TrackingError::MapUnavailable(
                "environment not mapped yet".to_string(),
            ));
        }

        let sequence = self.frames_captured.fetch_add(1, Ordering::SeqCst);
        let mut data = sequence.to_le_bytes().to_vec();
        data.push(mapping_status as u8);
        Ok(SpatialFrame::new(ulid::Ulid::new().to_string(), data))
    }

    fn request_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.state.write().adopted_frame = None;
        self.set_mapping_status(MappingStatus::NotAvailable);
        self.set_quality(TrackingQuality::Limited(LimitedReason::Initializing));
    }

    fn relocalize(&self, frame: &SpatialFrame) {
        self.state.write().adopted_frame = Some(frame.id.clone());
        self.set_quality(TrackingQuality::Limited(LimitedReason::Relocalizing));
    }
}
