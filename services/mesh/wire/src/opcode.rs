//! Access-layer opcode codec.
//!
//! An opcode occupies the first one, two or three octets of an access payload.
//! The two high bits of the first octet select the width:
//!
//! ```text
//! 0xxxxxxx                      1 octet  (0x7F reserved)
//! 10xxxxxx xxxxxxxx             2 octets
//! 11xxxxxx xxxxxxxx xxxxxxxx    3 octets (vendor)
//! ```
//!
//! Multi-octet opcodes are reconstructed big-endian.

use crate::error::{ensure_len, WireError};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Reserved single-octet opcode
pub const RESERVED_OPCODE: u8 = 0x7F;

/// Decoded opcode with its encoded width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode {
    value: u32,
    width: u8,
}

impl Opcode {
    /// Single-octet opcode. Panics at compile time when used in a const with 0x7F or above.
    pub const fn single(value: u8) -> Self {
        assert!(value < RESERVED_OPCODE, "single-octet opcodes are 0x00..=0x7E");
        Self {
            value: value as u32,
            width: 1,
        }
    }

    /// Two-octet opcode, `10xxxxxx xxxxxxxx`
    pub const fn double(value: u16) -> Self {
        assert!(value & 0xC000 == 0x8000, "two-octet opcodes start with 0b10");
        Self {
            value: value as u32,
            width: 2,
        }
    }

    /// Three-octet vendor opcode, `11xxxxxx` followed by two octets
    pub const fn vendor(value: u32) -> Self {
        assert!(
            value & 0xC0_0000 == 0xC0_0000 && value <= 0xFF_FFFF,
            "vendor opcodes start with 0b11"
        );
        Self { value, width: 3 }
    }

    /// Build an opcode from its numeric value, inferring the width
    pub fn new(value: u32) -> Result<Self, WireError> {
        match value {
            v if v < RESERVED_OPCODE as u32 => Ok(Self { value: v, width: 1 }),
            v if (0x8000..=0xBFFF).contains(&v) => Ok(Self { value: v, width: 2 }),
            v if (0xC0_0000..=0xFF_FFFF).contains(&v) => Ok(Self { value: v, width: 3 }),
            v => Err(WireError::OpcodeRange(v)),
        }
    }

    /// Decode the opcode prefix of an access payload
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let first = *buf.first().ok_or(WireError::Empty)?;

        match first >> 6 {
            0b00 | 0b01 => {
                if first == RESERVED_OPCODE {
                    return Err(WireError::ReservedOpcode(first));
                }
                Ok(Self {
                    value: first as u32,
                    width: 1,
                })
            }
            0b10 => {
                ensure_len(buf, 2)?;
                Ok(Self {
                    value: u16::from_be_bytes([buf[0], buf[1]]) as u32,
                    width: 2,
                })
            }
            _ => {
                ensure_len(buf, 3)?;
                Ok(Self {
                    value: ((first as u32) << 16) | u16::from_be_bytes([buf[1], buf[2]]) as u32,
                    width: 3,
                })
            }
        }
    }

    /// Encode the opcode (big-endian, `width` octets)
    pub fn encode(&self, buf: &mut BytesMut) {
        match self.width {
            1 => buf.put_u8(self.value as u8),
            2 => buf.put_u16(self.value as u16),
            _ => {
                buf.put_u8((self.value >> 16) as u8);
                buf.put_u16(self.value as u16);
            }
        }
    }

    /// Numeric opcode value
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Encoded width in octets
    pub fn width(&self) -> usize {
        self.width as usize
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0w$x}", self.value, w = self.width() * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_octet_decode() {
        for first in (0x00u8..=0x7E).step_by(7) {
            let op = Opcode::decode(&[first, 0xAA, 0xBB]).unwrap();
            assert_eq!(op.value(), first as u32);
            assert_eq!(op.width(), 1);
        }
    }

    #[test]
    fn test_reserved_opcode() {
        assert_eq!(
            Opcode::decode(&[0x7F, 0x00]),
            Err(WireError::ReservedOpcode(0x7F))
        );
    }

    #[test]
    fn test_double_octet_decode() {
        let op = Opcode::decode(&[0x80, 0x08]).unwrap();
        assert_eq!(op, Opcode::double(0x8008));
        assert_eq!(op.width(), 2);

        assert!(matches!(
            Opcode::decode(&[0x80]),
            Err(WireError::Truncated { needed: 2, available: 1 })
        ));
    }

    #[test]
    fn test_vendor_decode() {
        let op = Opcode::decode(&[0xC1, 0x48, 0x00, 0x11]).unwrap();
        assert_eq!(op.value(), 0xC1_4800);
        assert_eq!(op.width(), 3);

        assert!(Opcode::decode(&[0xC1, 0x48]).is_err());
        assert_eq!(Opcode::decode(&[]), Err(WireError::Empty));
    }

    #[test]
    fn test_encode_matches_decode() {
        for op in [
            Opcode::single(0x00),
            Opcode::single(0x06),
            Opcode::double(0x8039),
            Opcode::double(0xBFFF),
            Opcode::vendor(0xC0_0000),
            Opcode::vendor(0xFE_1234),
        ] {
            let mut buf = BytesMut::new();
            op.encode(&mut buf);
            assert_eq!(buf.len(), op.width());
            assert_eq!(Opcode::decode(&buf).unwrap(), op);
        }
    }

    #[test]
    fn test_new_infers_width() {
        assert_eq!(Opcode::new(0x02).unwrap().width(), 1);
        assert_eq!(Opcode::new(0x8003).unwrap().width(), 2);
        assert_eq!(Opcode::new(0xC0_0001).unwrap().width(), 3);
        assert!(Opcode::new(0x7F).is_err());
        assert!(Opcode::new(0x1234).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::single(0x06).to_string(), "0x06");
        assert_eq!(Opcode::double(0x8008).to_string(), "0x8008");
    }
}
