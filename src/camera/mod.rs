//! PTZ camera operations over VISCA-over-IP
//!
//! A [`Camera`] composes the frame builders from [`crate::visca`] with a
//! [`CommandChannel`]. Operations never retry and carry no timeout of their
//! own; wrap them in [`with_timeout`] to bound them.

mod channel;
mod recall;

pub use channel::CommandChannel;
pub use recall::RecallOutcome;

use crate::visca::{Command, DeviceState, ReplyPattern, ViscaError, DEFAULT_MEMORY_SPEED};
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error(transparent)]
    Visca(#[from] ViscaError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Bounds `operation` by `limit`.
///
/// On expiry the operation future is dropped, which releases its socket. A
/// frame that already left the host is not recalled from the camera.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, CameraError>
where
    F: Future<Output = Result<T, CameraError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| CameraError::Timeout(limit))?
}

/// One configured PTZ device
pub struct Camera {
    index: usize,
    channel: CommandChannel,
    memory_speed: u8,

    // Recall bookkeeping
    ephemeral_autofocus: AtomicBool,
    generation: AtomicU64,
}

impl Camera {
    pub fn new(index: usize, addr: SocketAddr) -> Self {
        Self::with_memory_speed(index, addr, DEFAULT_MEMORY_SPEED)
    }

    pub fn with_memory_speed(index: usize, addr: SocketAddr, memory_speed: u8) -> Self {
        Self {
            index,
            channel: CommandChannel::new(addr),
            memory_speed,
            ephemeral_autofocus: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn addr(&self) -> SocketAddr {
        self.channel.addr()
    }

    /// True while a recall has unlocked focus and still owes a re-lock
    pub fn ephemeral_autofocus(&self) -> bool {
        self.ephemeral_autofocus.load(Ordering::SeqCst)
    }

    async fn command(&self, command: Command) -> Result<(), CameraError> {
        self.channel.execute(&command).await?;
        Ok(())
    }

    async fn inquire(&self, command: Command) -> Result<Bytes, CameraError> {
        self.channel
            .execute(&command)
            .await?
            .ok_or_else(|| ViscaError::Protocol("inquiry produced no reply".to_string()).into())
    }

    pub async fn set_power(&self, state: DeviceState) -> Result<(), CameraError> {
        debug!(camera = self.index, %state, "Set power state");
        self.command(Command::set_power(state)).await
    }

    pub async fn query_power(&self) -> Result<DeviceState, CameraError> {
        let reply = self.inquire(Command::power_inquiry()).await?;
        Ok(ReplyPattern::parse_state(&reply)?)
    }

    pub async fn set_iris(&self, iris: u16) -> Result<(), CameraError> {
        let command = Command::set_iris(iris)?;
        self.command(command).await
    }

    pub async fn set_focus(&self, focus: u16) -> Result<(), CameraError> {
        let command = Command::set_focus(focus)?;
        debug!(camera = self.index, focus, "Set focus");
        self.command(command).await
    }

    pub async fn query_focus(&self) -> Result<u16, CameraError> {
        let reply = self.inquire(Command::focus_inquiry()).await?;
        Ok(ReplyPattern::parse_value(&reply)?)
    }

    /// `On` means autofocus, `Off` means focus is locked
    pub async fn query_autofocus_mode(&self) -> Result<DeviceState, CameraError> {
        let reply = self.inquire(Command::autofocus_mode_inquiry()).await?;
        Ok(ReplyPattern::parse_state(&reply)?)
    }

    pub async fn query_zoom(&self) -> Result<u16, CameraError> {
        let reply = self.inquire(Command::zoom_inquiry()).await?;
        Ok(ReplyPattern::parse_value(&reply)?)
    }

    /// Locks or unlocks focus.
    ///
    /// Locking clears any pending ephemeral-autofocus re-lock. Unlocking is
    /// followed by an explicit autofocus-on so the camera refocuses at once.
    pub async fn set_focus_lock(&self, state: DeviceState) -> Result<(), CameraError> {
        debug!(camera = self.index, %state, "Set focus lock state");
        if state == DeviceState::On {
            self.ephemeral_autofocus.store(false, Ordering::SeqCst);
        }

        self.command(Command::set_focus_lock(state)).await?;

        if state == DeviceState::Off {
            self.command(Command::autofocus_on()).await?;
        }
        Ok(())
    }

    pub async fn store_memory(&self, position: u8) -> Result<(), CameraError> {
        let command = Command::memory_set(position)?;
        debug!(camera = self.index, position, "Save position to memory");
        self.command(command).await
    }

    async fn memory_recall(&self, position: u8) -> Result<(), CameraError> {
        let recall = Command::memory_recall(position)?;
        self.command(Command::recall_speed(self.memory_speed)).await?;
        self.command(recall).await
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("index", &self.index)
            .field("addr", &self.addr())
            .field("ephemeral_autofocus", &self.ephemeral_autofocus())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}
