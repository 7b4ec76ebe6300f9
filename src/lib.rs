//! VISCA-over-IP PTZ camera control with tally-driven relay routing
//!
//! This library provides:
//! - VISCA frame building and reply parsing for PTZ cameras over UDP
//! - Memory recall with focus restore, superseded by newer recalls
//! - A reconnecting tally state client with change de-duplication
//! - A UDP relay that points a hardware controller at the live camera
//! - A WebSocket control surface and an HTTP status endpoint
//!
//! # Example
//!
//! ```no_run
//! use ptz_tally_control::camera::{with_timeout, Camera};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), ptz_tally_control::camera::CameraError> {
//! let camera = Camera::new(0, "10.1.0.31:1259".parse().unwrap());
//! let focus = with_timeout(Duration::from_secs(5), camera.query_focus()).await?;
//! with_timeout(Duration::from_secs(20), camera.recall(3, focus)).await?;
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod config;
pub mod control;
pub mod relay;
pub mod routing;
pub mod store;
pub mod tally;
pub mod visca;
pub mod web;

// Re-exports for convenience
pub use camera::{Camera, CameraError, RecallOutcome};
pub use control::{ControlContext, ControlSettings};
pub use relay::{RelayRouter, RelayStats, RelayTarget};
pub use routing::LiveRoutingPolicy;
pub use tally::{TallyChange, TallyConfig, TallyListener, TallyMonitor, TallyMonitorHandle};
