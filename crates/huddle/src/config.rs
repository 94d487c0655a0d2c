//! Node configuration.

use std::time::Duration;

use huddle_sync::SyncConfig;

/// Discovery service type advertised and browsed for.
pub const DEFAULT_SERVICE_ID: &str = "huddle-sync";

/// Configuration for a [`Node`](crate::Node).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Discovery service type.
    pub service_id: String,
    /// Device name used when a new identity is created.
    pub display_name: String,
    /// How long an outbound invitation waits for an answer.
    pub invite_timeout: Duration,
    /// Transport cap on simultaneous sessions.
    pub max_peers: usize,
    /// Connected-peer count at which a capacity warning is raised.
    pub capacity_warning_threshold: usize,
    /// Capacity of the command channel.
    pub event_buffer: usize,
    /// Sync protocol configuration.
    pub sync: SyncConfig,
}

impl NodeConfig {
    /// Default configuration with the given device name.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let max_peers = 8;
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            display_name: "Device".to_string(),
            invite_timeout: Duration::from_secs(30),
            max_peers,
            capacity_warning_threshold: max_peers - 1,
            event_buffer: 64,
            sync: SyncConfig::default(),
        }
    }
}
