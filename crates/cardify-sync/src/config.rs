//! Replica configuration.

use crate::tracking::MappingStatus;
use cardify_core::DEFAULT_LABEL;

/// Configuration for a replica.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Label given to anchors the user places.
    pub placement_label: String,
    /// Anchors whose label starts with this prefix are rendered.
    pub render_prefix: String,
    /// Minimum mapping status before the world map may be shared.
    pub share_threshold: MappingStatus,
    /// Capacity of the store event channel. Slow observers lag past this.
    pub store_event_buffer: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            placement_label: DEFAULT_LABEL.to_string(),
            render_prefix: DEFAULT_LABEL.to_string(),
            share_threshold: MappingStatus::Extending,
            store_event_buffer: 256,
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn placement_label(mut self, label: impl Into<String>) -> Self {
        self.config.placement_label = label.into();
        self
    }

    pub fn render_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.render_prefix = prefix.into();
        self
    }

    pub fn share_threshold(mut self, status: MappingStatus) -> Self {
        self.config.share_threshold = status;
        self
    }

    pub fn store_event_buffer(mut self, capacity: usize) -> Self {
        self.config.store_event_buffer = capacity.max(1);
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
