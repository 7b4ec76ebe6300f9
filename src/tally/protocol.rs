//! Tally wire format
//!
//! ```text
//! handshake:  [0xFF][count][id_1 .. id_n]
//! frame:      [id][state]
//! keep-alive: [0xFF][0xFF]   (both directions)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

pub const FORMAT_MARKER: u8 = 0xFF;
pub const FRAME_SIZE: usize = 2;
pub const KEEPALIVE: [u8; FRAME_SIZE] = [0xFF, 0xFF];

/// Builds the subscription handshake for the given tally ids
pub fn handshake(ids: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + ids.len());
    buf.put_u8(FORMAT_MARKER);
    buf.put_u8(ids.len() as u8);
    buf.put_slice(ids);
    buf.freeze()
}

/// One decoded 2-byte frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyFrame {
    KeepAlive,
    State { id: u8, state: u8 },
}

impl TallyFrame {
    pub fn decode(frame: [u8; FRAME_SIZE]) -> Self {
        if frame == KEEPALIVE {
            TallyFrame::KeepAlive
        } else {
            TallyFrame::State {
                id: frame[0],
                state: frame[1],
            }
        }
    }
}
