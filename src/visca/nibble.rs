//! Fixed-width radix-16 parameter encoding
//!
//! Multi-byte parameters (focus, iris, zoom) travel as four bytes that each
//! carry one nibble in their low half, most significant nibble first:
//!
//! ```text
//! 1770 = 0x06EA  ->  [0x00, 0x06, 0x0E, 0x0A]
//! ```

use super::ViscaError;

/// Splits `value` into four big-endian nibbles.
///
/// Every digit is produced by `value mod 16`, so intermediate quotients of
/// exactly 16 (values such as 16 or 256..=271) still yield valid nibbles.
pub fn encode_nibbles(value: u16) -> [u8; 4] {
    let mut nibbles = [0u8; 4];
    let mut rest = value;
    for slot in nibbles.iter_mut().rev() {
        *slot = (rest % 16) as u8;
        rest /= 16;
    }
    nibbles
}

/// Reassembles a value from big-endian nibbles.
pub fn decode_nibbles(nibbles: &[u8]) -> Result<u16, ViscaError> {
    if nibbles.len() != 4 {
        return Err(ViscaError::Protocol(format!(
            "expected 4 nibbles, got {}",
            nibbles.len()
        )));
    }

    let mut result: u16 = 0;
    for &nibble in nibbles {
        if nibble > 0x0F {
            return Err(ViscaError::Protocol(format!(
                "invalid nibble {:#04x}, only the low half may be used",
                nibble
            )));
        }
        result = result * 16 + u16::from(nibble);
    }
    Ok(result)
}
