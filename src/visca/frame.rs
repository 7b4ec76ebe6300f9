//! Command frames and reply templates

use super::{
    check_range, encode_nibbles, decode_nibbles, DeviceState, ViscaError, DEVICE_ADDRESS,
    MARKER_COMMAND, MARKER_FOCUS_LOCK, MARKER_INQUIRY, MAX_FOCUS, MAX_IRIS, MAX_POSITION,
    REPLY_ADDRESS, REPLY_COMPLETION, TERMINATOR,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Category bytes
const CATEGORY_CAMERA: u8 = 0x04;
const CATEGORY_PAN_TILT: u8 = 0x06;

/// Op bytes (camera category unless noted)
const OP_POWER: u8 = 0x00;
const OP_FOCUS_MODE: u8 = 0x38;
const OP_MEMORY: u8 = 0x3F;
const OP_ZOOM_DIRECT: u8 = 0x47;
const OP_FOCUS_DIRECT: u8 = 0x48;
const OP_IRIS_DIRECT: u8 = 0x4B;
const OP_FOCUS_LOCK: u8 = 0x68;
const OP_RECALL_SPEED: u8 = 0x01; // pan-tilt category

const MEMORY_SET: u8 = 0x01;
const MEMORY_RECALL: u8 = 0x02;

/// A complete, ready-to-send VISCA frame
///
/// Inquiries are answered by a single reply carrying data; commands are
/// answered by an acknowledge followed by a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Bytes,
    inquiry: bool,
}

impl Command {
    fn build(marker: u8, category: u8, op: u8, params: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(5 + params.len());
        buf.put_u8(DEVICE_ADDRESS);
        buf.put_u8(marker);
        buf.put_u8(category);
        buf.put_u8(op);
        buf.put_slice(params);
        buf.put_u8(TERMINATOR);

        Self {
            bytes: buf.freeze(),
            inquiry: marker == MARKER_INQUIRY,
        }
    }

    fn with_value(op: u8, value: u16) -> Self {
        Self::build(MARKER_COMMAND, CATEGORY_CAMERA, op, &encode_nibbles(value))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_inquiry(&self) -> bool {
        self.inquiry
    }

    /// Number of datagrams the camera answers this frame with
    pub fn expected_replies(&self) -> usize {
        if self.inquiry {
            1
        } else {
            2
        }
    }

    pub fn set_power(state: DeviceState) -> Self {
        Self::build(MARKER_COMMAND, CATEGORY_CAMERA, OP_POWER, &[state.code()])
    }

    pub fn power_inquiry() -> Self {
        Self::build(MARKER_INQUIRY, CATEGORY_CAMERA, OP_POWER, &[])
    }

    pub fn set_iris(iris: u16) -> Result<Self, ViscaError> {
        check_range("iris", iris.into(), MAX_IRIS.into())?;
        Ok(Self::with_value(OP_IRIS_DIRECT, iris))
    }

    pub fn set_focus(focus: u16) -> Result<Self, ViscaError> {
        check_range("focus", focus.into(), MAX_FOCUS.into())?;
        Ok(Self::with_value(OP_FOCUS_DIRECT, focus))
    }

    pub fn focus_inquiry() -> Self {
        Self::build(MARKER_INQUIRY, CATEGORY_CAMERA, OP_FOCUS_DIRECT, &[])
    }

    pub fn autofocus_mode_inquiry() -> Self {
        Self::build(MARKER_INQUIRY, CATEGORY_CAMERA, OP_FOCUS_MODE, &[])
    }

    /// Switches the focus mode to automatic
    pub fn autofocus_on() -> Self {
        Self::build(
            MARKER_COMMAND,
            CATEGORY_CAMERA,
            OP_FOCUS_MODE,
            &[DeviceState::On.code()],
        )
    }

    pub fn zoom_inquiry() -> Self {
        Self::build(MARKER_INQUIRY, CATEGORY_CAMERA, OP_ZOOM_DIRECT, &[])
    }

    pub fn set_focus_lock(state: DeviceState) -> Self {
        Self::build(
            MARKER_FOCUS_LOCK,
            CATEGORY_CAMERA,
            OP_FOCUS_LOCK,
            &[state.code()],
        )
    }

    pub fn memory_set(position: u8) -> Result<Self, ViscaError> {
        check_range("position", position.into(), MAX_POSITION.into())?;
        Ok(Self::build(
            MARKER_COMMAND,
            CATEGORY_CAMERA,
            OP_MEMORY,
            &[MEMORY_SET, position],
        ))
    }

    pub fn recall_speed(speed: u8) -> Self {
        Self::build(MARKER_COMMAND, CATEGORY_PAN_TILT, OP_RECALL_SPEED, &[speed])
    }

    pub fn memory_recall(position: u8) -> Result<Self, ViscaError> {
        check_range("position", position.into(), MAX_POSITION.into())?;
        Ok(Self::build(
            MARKER_COMMAND,
            CATEGORY_CAMERA,
            OP_MEMORY,
            &[MEMORY_RECALL, position],
        ))
    }
}

/// Expected reply layout; `None` positions match any byte
#[derive(Debug, Clone, Copy)]
pub struct ReplyPattern {
    template: &'static [Option<u8>],
}

impl ReplyPattern {
    /// `90 50 ss FF`
    pub const STATE: ReplyPattern = ReplyPattern {
        template: &[
            Some(REPLY_ADDRESS),
            Some(REPLY_COMPLETION),
            None,
            Some(TERMINATOR),
        ],
    };

    /// `90 50 0p 0q 0r 0s FF`
    pub const VALUE: ReplyPattern = ReplyPattern {
        template: &[
            Some(REPLY_ADDRESS),
            Some(REPLY_COMPLETION),
            None,
            None,
            None,
            None,
            Some(TERMINATOR),
        ],
    };

    pub fn check(&self, reply: &[u8]) -> Result<(), ViscaError> {
        let matches = reply.len() == self.template.len()
            && self
                .template
                .iter()
                .zip(reply)
                .all(|(expected, received)| expected.map_or(true, |e| e == *received));

        if !matches {
            return Err(ViscaError::Protocol(format!(
                "reply has unexpected format, expected {}, received {}",
                self,
                hex(reply)
            )));
        }
        Ok(())
    }

    /// Validates a state reply and extracts its state byte
    pub fn parse_state(reply: &[u8]) -> Result<DeviceState, ViscaError> {
        Self::STATE.check(reply)?;
        DeviceState::try_from(reply[2])
    }

    /// Validates a 4-nibble value reply and decodes it
    pub fn parse_value(reply: &[u8]) -> Result<u16, ViscaError> {
        Self::VALUE.check(reply)?;
        decode_nibbles(&reply[2..6])
    }
}

impl std::fmt::Display for ReplyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .template
            .iter()
            .map(|b| b.map_or_else(|| "??".to_string(), |b| format!("{:02x}", b)))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Space-separated hex dump used in log lines and error messages
pub(crate) fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
