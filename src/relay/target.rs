//! Shared relay target cell

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

/// The camera currently receiving forwarded controller traffic
///
/// Cloning shares the cell. Readers always see the latest completed write.
#[derive(Debug, Clone, Default)]
pub struct RelayTarget {
    inner: Arc<RwLock<Option<SocketAddr>>>,
}

impl RelayTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<SocketAddr> {
        *self.inner.read()
    }

    /// Write access for the routing policy, the only writer of the cell
    pub fn writer(&self) -> RelayTargetWriter {
        RelayTargetWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Write-only handle to a [`RelayTarget`]
#[derive(Debug)]
pub struct RelayTargetWriter {
    inner: Arc<RwLock<Option<SocketAddr>>>,
}

impl RelayTargetWriter {
    pub fn set(&self, addr: SocketAddr) {
        *self.inner.write() = Some(addr);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}
