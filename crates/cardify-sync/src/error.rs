//! Error types for the replication layer.

use crate::codec::{DecodeError, EncodeError};
use crate::network::SendError;
use crate::session::ShareBlock;
use crate::tracking::TrackingError;
use cardify_core::StoreError;
use thiserror::Error;

/// Error type for replication operations.
///
/// None of these are fatal: the worst outcome of any of them is that one
/// message or one user action is dropped while state stays consistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("Map sharing not permitted: {0}")]
    SharingBlocked(ShareBlock),

    #[error("Replica task is no longer running")]
    ReplicaClosed,
}

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, SyncError>;
