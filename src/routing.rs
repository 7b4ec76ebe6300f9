//! Tally-driven choice of the relay target
//!
//! A camera becomes the relay target when its tally state equals the
//! preview-only code. With "allow on-air change" enabled, any state carrying
//! the on-air bit also selects it. When the camera currently held reports a
//! state matching neither rule, the target is cleared.

use crate::relay::RelayTargetWriter;
use crate::tally::{TallyChange, TallyListener};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const DEFAULT_PREVIEW_CODE: u8 = 1;
pub const DEFAULT_ON_AIR_MASK: u8 = 0x01;

pub struct LiveRoutingPolicy {
    camera_addrs: Vec<SocketAddr>,
    target: RelayTargetWriter,
    held: Mutex<Option<usize>>,
    allow_on_air_change: AtomicBool,
    preview_code: u8,
    on_air_mask: u8,
}

impl LiveRoutingPolicy {
    pub fn new(camera_addrs: Vec<SocketAddr>, target: RelayTargetWriter) -> Self {
        Self {
            camera_addrs,
            target,
            held: Mutex::new(None),
            allow_on_air_change: AtomicBool::new(false),
            preview_code: DEFAULT_PREVIEW_CODE,
            on_air_mask: DEFAULT_ON_AIR_MASK,
        }
    }

    pub fn with_codes(mut self, preview_code: u8, on_air_mask: u8) -> Self {
        self.preview_code = preview_code;
        self.on_air_mask = on_air_mask;
        self
    }

    pub fn allow_on_air_change(&self) -> bool {
        self.allow_on_air_change.load(Ordering::SeqCst)
    }

    /// Operator switch; takes effect with the next tally change
    pub fn set_allow_on_air_change(&self, allow: bool) {
        info!(allow, "On-air change for relay");
        self.allow_on_air_change.store(allow, Ordering::SeqCst);
    }

    /// Camera index whose address is currently the relay target
    pub fn held(&self) -> Option<usize> {
        *self.held.lock()
    }

    fn selects(&self, state: u8) -> bool {
        state == self.preview_code
            || (self.allow_on_air_change() && state & self.on_air_mask != 0)
    }

    pub fn apply(&self, camera: usize, state: u8) {
        let Some(&addr) = self.camera_addrs.get(camera) else {
            debug!(camera, "No address for camera, relay unchanged");
            return;
        };

        let mut held = self.held.lock();
        if self.selects(state) {
            if *held != Some(camera) {
                info!(camera, %addr, state, "Relay target set");
            }
            self.target.set(addr);
            *held = Some(camera);
        } else if *held == Some(camera) {
            info!(camera, state, "Relay target cleared");
            self.target.clear();
            *held = None;
        }
    }
}

impl TallyListener for LiveRoutingPolicy {
    fn on_tally_change(&self, change: TallyChange) {
        self.apply(change.camera, change.state);
    }
}
