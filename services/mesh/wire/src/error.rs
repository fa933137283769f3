//! Wire format error types.

use thiserror::Error;

/// Access-layer wire errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Empty access payload
    #[error("empty access payload")]
    Empty,

    /// Opcode value reserved for future use
    #[error("reserved opcode 0x{0:02x}")]
    ReservedOpcode(u8),

    /// Buffer shorter than the encoded field requires
    #[error("truncated: need {needed} octets, have {available}")]
    Truncated {
        /// Octets the field requires
        needed: usize,
        /// Octets actually present
        available: usize,
    },

    /// Value cannot be represented in the requested opcode width
    #[error("opcode value 0x{0:06x} out of range")]
    OpcodeRange(u32),

    /// Logarithmic field outside the permitted range
    #[error("prohibited log value 0x{0:02x}")]
    ProhibitedLog(u8),

    /// TTL outside the permitted range
    #[error("invalid ttl {0}")]
    Ttl(u8),

    /// Unknown status code
    #[error("unknown status {0}")]
    Status(u8),
}

/// Check that `buf` holds at least `needed` octets
pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<(), WireError> {
    if buf.len() < needed {
        return Err(WireError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}
