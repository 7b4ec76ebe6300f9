//! Relay statistics

use serde::{Deserialize, Serialize};

/// Counters for the relay router
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Datagrams forwarded from a controller to the target camera
    pub to_camera: u64,

    /// Replies forwarded from the target camera to the last controller
    pub to_client: u64,

    /// Datagrams dropped because no target was set
    pub dropped_no_target: u64,

    /// Camera replies dropped because no controller had spoken yet
    pub dropped_no_client: u64,

    /// Failed receives or sends
    pub errors: u64,
}
