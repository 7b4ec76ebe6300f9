//! UDP relay towards the live camera
//!
//! An external hardware controller speaks VISCA to the relay port as if it
//! were a single camera. Its datagrams go to whichever camera the routing
//! policy currently marks live, and that camera's replies go back to the
//! controller that spoke last.

mod stats;
mod target;

pub use stats::RelayStats;
pub use target::{RelayTarget, RelayTargetWriter};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const MAX_DATAGRAM_SIZE: usize = 2048;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to bind relay socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an inbound datagram goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// No target is set
    Drop,
    /// Reply from the target, but no controller is known yet
    NoClient,
    /// Reply from the target back to the controller
    ToClient(SocketAddr),
    /// Controller datagram to the target camera
    ToCamera(SocketAddr),
}

/// Routing decision state: the last controller that spoke
#[derive(Debug, Default)]
pub struct RouteTable {
    client: Option<SocketAddr>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Option<SocketAddr> {
        self.client
    }

    pub fn route(&mut self, from: SocketAddr, target: Option<SocketAddr>) -> Route {
        let Some(target) = target else {
            return Route::Drop;
        };

        if from == target {
            return match self.client {
                Some(client) => Route::ToClient(client),
                None => Route::NoClient,
            };
        }

        self.client = Some(from);
        Route::ToCamera(target)
    }
}

/// Lock-free relay counters shared with status readers
#[derive(Debug, Default)]
pub struct RelayCounters {
    to_camera: AtomicU64,
    to_client: AtomicU64,
    dropped_no_target: AtomicU64,
    dropped_no_client: AtomicU64,
    errors: AtomicU64,
}

impl RelayCounters {
    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            to_camera: self.to_camera.load(Ordering::Relaxed),
            to_client: self.to_client.load(Ordering::Relaxed),
            dropped_no_target: self.dropped_no_target.load(Ordering::Relaxed),
            dropped_no_client: self.dropped_no_client.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct RelayRouter {
    socket: UdpSocket,
    target: RelayTarget,
    routes: RouteTable,
    counters: Arc<RelayCounters>,
}

impl RelayRouter {
    /// Binds the relay endpoint; failure here is fatal for startup
    pub async fn bind(addr: SocketAddr, target: RelayTarget) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;

        info!(local = %socket.local_addr()?, "Relay bound");

        Ok(Self {
            socket,
            target,
            routes: RouteTable::new(),
            counters: Arc::new(RelayCounters::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn counters(&self) -> Arc<RelayCounters> {
        Arc::clone(&self.counters)
    }

    /// Forwards datagrams until `shutdown` fires or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP unreachable from a previous send surfaces here on some platforms
                        warn!(error = %e, "Error in relay receive");
                        self.counters.errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            self.forward(&buf[..len], from).await;
        }

        info!("Relay stopped");
    }

    async fn forward(&mut self, data: &[u8], from: SocketAddr) {
        let dest = match self.routes.route(from, self.target.get()) {
            Route::Drop => {
                debug!(%from, "No relay target, datagram dropped");
                self.counters.dropped_no_target.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Route::NoClient => {
                debug!(%from, "Camera reply without a known client, dropped");
                self.counters.dropped_no_client.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Route::ToClient(client) => {
                self.counters.to_client.fetch_add(1, Ordering::Relaxed);
                client
            }
            Route::ToCamera(camera) => {
                self.counters.to_camera.fetch_add(1, Ordering::Relaxed);
                camera
            }
        };

        if let Err(e) = self.socket.send_to(data, dest).await {
            warn!(error = %e, %dest, "Error in relay send");
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
