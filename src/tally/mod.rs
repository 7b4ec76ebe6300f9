//! Tally state monitoring client
//!
//! Keeps one TCP connection to the tally source for all monitored cameras.
//! After the handshake a keep-alive task writes the sentinel frame
//! periodically while the reader decodes incoming 2-byte frames. Changes are
//! reported to a [`TallyListener`], repeated identical states are suppressed.
//!
//! Any transport error tears the connection down and the monitor reconnects
//! with exponential [`Backoff`]. It only ends when stopped.

mod backoff;
mod protocol;

pub use backoff::Backoff;
pub use protocol::{handshake, TallyFrame, FRAME_SIZE, KEEPALIVE};

use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runtime settings for the tally monitor
#[derive(Debug, Clone)]
pub struct TallyConfig {
    pub host: String,
    pub port: u16,
    /// Tally device ids, index-aligned with the camera list
    pub ids: Vec<u8>,
    pub keepalive_interval: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
}

/// A de-duplicated tally state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TallyChange {
    pub camera: usize,
    pub previous: u8,
    pub state: u8,
}

/// Receives tally changes, called from the monitor task
pub trait TallyListener: Send + Sync + 'static {
    fn on_tally_change(&self, change: TallyChange);
}

impl<F> TallyListener for F
where
    F: Fn(TallyChange) + Send + Sync + 'static,
{
    fn on_tally_change(&self, change: TallyChange) {
        self(change)
    }
}

/// How a single connection ended
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Closed,
    Failed(io::Error),
}

/// Result of waiting for the next frame
#[derive(Debug)]
enum ReadOutcome {
    Frame([u8; FRAME_SIZE]),
    Closed,
    Cancelled,
    Failed(io::Error),
}

/// Keep-alive writer; aborted when dropped
struct KeepAlive {
    task: JoinHandle<io::Error>,
}

impl KeepAlive {
    fn spawn(mut writer: OwnedWriteHalf, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(e) = writer.write_all(&KEEPALIVE).await {
                    return e;
                }
                debug!("Keep-alive sent");
            }
        });
        Self { task }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Handle to a running monitor
///
/// Dropping the handle stops the monitor as well.
pub struct TallyMonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TallyMonitorHandle {
    /// Stops reader, keep-alive and any pending reconnect, then waits for the task
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Tally monitor task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct TallyMonitor {
    config: TallyConfig,
    listener: Arc<dyn TallyListener>,
    last_states: Vec<u8>,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl TallyMonitor {
    /// Starts monitoring in a background task
    pub fn spawn(config: TallyConfig, listener: Arc<dyn TallyListener>) -> TallyMonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = TallyMonitor {
            last_states: vec![0; config.ids.len()],
            backoff: Backoff::new(config.reconnect_floor, config.reconnect_ceiling),
            config,
            listener,
            shutdown: shutdown_rx,
        };

        TallyMonitorHandle {
            shutdown: shutdown_tx,
            task: tokio::spawn(monitor.run()),
        }
    }

    async fn run(mut self) {
        info!(
            host = %self.config.host,
            port = self.config.port,
            ids = ?self.config.ids,
            "Connecting to tally state monitoring"
        );

        loop {
            match self.run_session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Closed => warn!("Tally connection closed by peer"),
                SessionEnd::Failed(e) => warn!(error = %e, "Tally connection failed"),
            }

            let delay = self.backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to tally source");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        info!("Tally monitor stopped");
    }

    async fn run_session(&mut self) -> SessionEnd {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let stream = tokio::select! {
            result = TcpStream::connect(&addr) => match result {
                Ok(stream) => stream,
                Err(e) => return SessionEnd::Failed(e),
            },
            _ = self.shutdown.changed() => return SessionEnd::Cancelled,
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (mut reader, mut writer) = stream.into_split();
        if let Err(e) = writer.write_all(&handshake(&self.config.ids)).await {
            return SessionEnd::Failed(e);
        }
        info!(addr = %addr, cameras = self.config.ids.len(), "Tally handshake sent");

        // Dropping the keep-alive on any return closes the write half
        let mut keepalive = KeepAlive::spawn(writer, self.config.keepalive_interval);

        loop {
            match self.read_frame(&mut reader, &mut keepalive).await {
                ReadOutcome::Frame(frame) => {
                    self.backoff.reset();
                    self.handle_frame(frame);
                }
                ReadOutcome::Closed => return SessionEnd::Closed,
                ReadOutcome::Cancelled => return SessionEnd::Cancelled,
                ReadOutcome::Failed(e) => return SessionEnd::Failed(e),
            }
        }
    }

    async fn read_frame(
        &mut self,
        reader: &mut OwnedReadHalf,
        keepalive: &mut KeepAlive,
    ) -> ReadOutcome {
        let mut frame = [0u8; FRAME_SIZE];

        tokio::select! {
            result = reader.read_exact(&mut frame) => match result {
                Ok(_) => ReadOutcome::Frame(frame),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => ReadOutcome::Closed,
                Err(e) => ReadOutcome::Failed(e),
            },
            result = &mut keepalive.task => match result {
                Ok(e) => ReadOutcome::Failed(e),
                Err(e) => ReadOutcome::Failed(io::Error::new(io::ErrorKind::Other, e)),
            },
            _ = self.shutdown.changed() => ReadOutcome::Cancelled,
        }
    }

    fn handle_frame(&mut self, frame: [u8; FRAME_SIZE]) {
        let (id, state) = match TallyFrame::decode(frame) {
            TallyFrame::KeepAlive => {
                debug!("Keep-alive received");
                return;
            }
            TallyFrame::State { id, state } => (id, state),
        };

        let Some(camera) = self.config.ids.iter().position(|&known| known == id) else {
            warn!(id, state, "Tally state for unmonitored device");
            return;
        };

        let previous = self.last_states[camera];
        if state == previous {
            debug!(camera, state, "Received unchanged tally state");
            return;
        }

        self.last_states[camera] = state;
        info!(camera, id, previous, state, "Switched tally state");
        self.listener.on_tally_change(TallyChange {
            camera,
            previous,
            state,
        });
    }
}
