//! JSON messages exchanged with control clients
//!
//! Every message is an object `{"event": <name>, "data": <payload>}`.

use crate::store::ButtonRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported event: {0}")]
    Unsupported(String),
}

/// A camera memory button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRef {
    pub cam: usize,
    pub pos: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonUpdate {
    pub cam: usize,
    pub pos: u8,
    pub name: String,
    pub btn_class: String,
}

/// Requests from a control client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    UpdateButton(ButtonUpdate),
    SavePos(PositionRef),
    RecallPos(PositionRef),
    FocusLock,
    FocusUnlock,
    PowerOn,
    PowerOff,
    ClearAll,
    Reconnect,
    AllowOnAirChange(bool),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let Envelope { event, data } = serde_json::from_str(text)?;

        let parsed = match event.as_str() {
            "update_button" => ClientEvent::UpdateButton(serde_json::from_value(data)?),
            "save_pos" => ClientEvent::SavePos(serde_json::from_value(data)?),
            "recall_pos" => ClientEvent::RecallPos(serde_json::from_value(data)?),
            "focus_lock" => ClientEvent::FocusLock,
            "focus_unlock" => ClientEvent::FocusUnlock,
            "power_on" => ClientEvent::PowerOn,
            "power_off" => ClientEvent::PowerOff,
            "clear_all" => ClientEvent::ClearAll,
            "reconnect" => ClientEvent::Reconnect,
            "allow_on_air_change" => ClientEvent::AllowOnAirChange(serde_json::from_value(data)?),
            _ => return Err(MessageError::Unsupported(event)),
        };
        Ok(parsed)
    }
}

/// Snapshot sent to a client when it connects
#[derive(Debug, Clone, Serialize)]
pub struct InitData {
    pub camera_ips: Vec<String>,
    pub all_pos: Vec<ButtonRecord>,
    pub tally_states: Vec<u8>,
    pub allow_on_air_change: bool,
}

/// Messages pushed to control clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Init(InitData),
    UpdateTally(Vec<u8>),
    UpdateButton(ButtonUpdate),
    UpdateOnAirChange(bool),
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
