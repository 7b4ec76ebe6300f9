//! VISCA-over-IP frame construction and reply parsing
//!
//! Only the subset of the camera command set needed for position recall is
//! implemented: power, iris, focus, zoom inquiry, memory store/recall and
//! focus lock. Every frame starts with a 2-byte header, followed by the
//! category and op bytes, zero or more parameter bytes, and the terminator.

mod frame;
mod nibble;

pub(crate) use frame::hex;
pub use frame::{Command, ReplyPattern};
pub use nibble::{decode_nibbles, encode_nibbles};

use thiserror::Error;

/// VISCA protocol constants
pub const DEVICE_ADDRESS: u8 = 0x81;
pub const MARKER_COMMAND: u8 = 0x01;
pub const MARKER_INQUIRY: u8 = 0x09;
pub const MARKER_FOCUS_LOCK: u8 = 0x0A;
pub const TERMINATOR: u8 = 0xFF;
pub const REPLY_ADDRESS: u8 = 0x90;
pub const REPLY_COMPLETION: u8 = 0x50;

pub const DEFAULT_PORT: u16 = 1259;
pub const DEFAULT_MEMORY_SPEED: u8 = 0x18;

/// Parameter bounds
pub const MAX_POSITION: u8 = 127;
pub const MAX_FOCUS: u16 = 1770;
pub const MAX_IRIS: u16 = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViscaError {
    #[error("{name} {value} out of range 0..={max}")]
    Range {
        name: &'static str,
        value: u32,
        max: u32,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Power, focus-lock and autofocus state as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    On,
    Off,
    Error,
}

impl DeviceState {
    pub fn code(self) -> u8 {
        match self {
            DeviceState::On => 2,
            DeviceState::Off => 3,
            DeviceState::Error => 4,
        }
    }
}

impl TryFrom<u8> for DeviceState {
    type Error = ViscaError;

    fn try_from(code: u8) -> Result<Self, ViscaError> {
        match code {
            2 => Ok(DeviceState::On),
            3 => Ok(DeviceState::Off),
            4 => Ok(DeviceState::Error),
            other => Err(ViscaError::Protocol(format!(
                "unknown state code {:#04x}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceState::On => "on",
            DeviceState::Off => "off",
            DeviceState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Checks a parameter against its protocol bound before anything is sent
pub(crate) fn check_range(name: &'static str, value: u32, max: u32) -> Result<(), ViscaError> {
    if value > max {
        return Err(ViscaError::Range { name, value, max });
    }
    Ok(())
}
