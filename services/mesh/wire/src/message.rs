//! Access messages, addresses and model identifiers.

use crate::error::{ensure_len, WireError};
use crate::opcode::Opcode;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unassigned address
pub const UNASSIGNED_ADDRESS: u16 = 0x0000;

/// Returns true for unicast element addresses (0x0001..=0x7FFF)
pub fn is_unicast(address: u16) -> bool {
    address != UNASSIGNED_ADDRESS && address & 0x8000 == 0
}

/// A received access payload: opcode prefix followed by parameters.
///
/// The transport layer supplies the addressing metadata alongside the raw
/// payload. Dispatch consumes the message once and does not retain it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMessage {
    /// Source element address of the sender
    pub src: u16,
    /// Destination address the message was received on
    pub dst: u16,
    /// NetKey index the message was received under
    pub netkey_index: u16,
    /// Opcode plus parameters
    pub data: Bytes,
}

impl AccessMessage {
    /// Create a message from raw access payload bytes
    pub fn new(src: u16, dst: u16, netkey_index: u16, data: impl Into<Bytes>) -> Self {
        Self {
            src,
            dst,
            netkey_index,
            data: data.into(),
        }
    }

    /// Decode the opcode prefix
    pub fn opcode(&self) -> Result<Opcode, WireError> {
        Opcode::decode(&self.data)
    }

    /// Total payload length including the opcode
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Parameters following an opcode of the given width
    pub fn parameters(&self, opcode: Opcode) -> &[u8] {
        self.data.get(opcode.width()..).unwrap_or_default()
    }
}

/// Build an access payload from an opcode and encoded parameters
pub fn access_payload(opcode: Opcode, parameters: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(opcode.width() + parameters.len());
    opcode.encode(&mut buf);
    buf.put_slice(parameters);
    buf.freeze()
}

/// Model identifier: a 16-bit SIG id or a 32-bit vendor id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    /// Bluetooth SIG model
    Sig(u16),
    /// Vendor model: company id in the low 16 bits, model in the high 16 bits
    Vendor(u32),
}

impl ModelId {
    /// Configuration Server model
    pub const CONFIGURATION_SERVER: ModelId = ModelId::Sig(0x0000);
    /// Health Server model
    pub const HEALTH_SERVER: ModelId = ModelId::Sig(0x0002);

    /// Read a model id at `offset`. The vendor form is used when four octets
    /// are available there, the SIG form otherwise.
    pub fn read(params: &[u8], offset: usize) -> Result<Self, WireError> {
        if params.len() >= offset + 4 {
            let b = &params[offset..offset + 4];
            Ok(ModelId::Vendor(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
        } else {
            ensure_len(params, offset + 2)?;
            Ok(ModelId::Sig(u16::from_le_bytes([
                params[offset],
                params[offset + 1],
            ])))
        }
    }

    /// Encoded width in octets
    pub fn width(&self) -> usize {
        match self {
            ModelId::Sig(_) => 2,
            ModelId::Vendor(_) => 4,
        }
    }

    /// Encode little-endian in its natural width
    pub fn encode(&self, buf: &mut BytesMut) {
        match *self {
            ModelId::Sig(id) => buf.put_u16_le(id),
            ModelId::Vendor(id) => buf.put_u32_le(id),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Sig(id) => write!(f, "sig:{:04x}", id),
            ModelId::Vendor(id) => write!(f, "vendor:{:08x}", id),
        }
    }
}

/// Read a little-endian u16 at `offset`
pub(crate) fn read_u16_le(params: &[u8], offset: usize) -> Result<u16, WireError> {
    ensure_len(params, offset + 2)?;
    Ok(u16::from_le_bytes([params[offset], params[offset + 1]]))
}

/// Read a single octet at `offset`
pub(crate) fn read_u8(params: &[u8], offset: usize) -> Result<u8, WireError> {
    ensure_len(params, offset + 1)?;
    Ok(params[offset])
}

/// Read a 16-octet array at `offset`
pub(crate) fn read_128(params: &[u8], offset: usize) -> Result<[u8; 16], WireError> {
    ensure_len(params, offset + 16)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&params[offset..offset + 16]);
    Ok(out)
}
