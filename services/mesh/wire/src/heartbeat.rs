//! Heartbeat publication messages and the logarithmic count/period encoding.
//!
//! Counts and periods travel as `log` octets: 0 means zero, `n` in
//! `0x01..=0x11` means `2^(n-1)`, and 0xFF (counts only) means indefinite.

use crate::error::{ensure_len, WireError};
use crate::message::{read_u16_le, read_u8};
use crate::opcode::Opcode;
use crate::status::StatusCode;
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Config Heartbeat Publication Get
pub const HEARTBEAT_PUBLICATION_GET: Opcode = Opcode::double(0x8038);
/// Config Heartbeat Publication Set
pub const HEARTBEAT_PUBLICATION_SET: Opcode = Opcode::double(0x8039);
/// Config Heartbeat Publication Status
pub const HEARTBEAT_PUBLICATION_STATUS: Opcode = Opcode::single(0x06);

/// Transport control opcode of a heartbeat message
pub const HEARTBEAT_CONTROL_OPCODE: u8 = 0x0A;

/// Largest finite log value
pub const MAX_LOG: u8 = 0x11;
/// Log value for an indefinite count
pub const LOG_INFINITE: u8 = 0xFF;
/// Expanded indefinite count
pub const COUNT_INFINITE: u32 = 0xFFFF;

/// Largest TTL a heartbeat may be published with
pub const MAX_HEARTBEAT_TTL: u8 = 0x7F;

/// Parameter length of a Heartbeat Publication Set
pub const HEARTBEAT_PUBLICATION_SET_LEN: usize = 9;

bitflags! {
    /// Features whose change triggers a heartbeat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Features: u16 {
        /// Relay feature
        const RELAY = 1 << 0;
        /// Proxy feature
        const PROXY = 1 << 1;
        /// Friend feature
        const FRIEND = 1 << 2;
        /// Low Power feature
        const LOW_POWER = 1 << 3;
    }
}

/// Expand a count log. Returns `None` for prohibited values.
pub fn expand_count_log(log: u8) -> Option<u32> {
    match log {
        0 => Some(0),
        1..=MAX_LOG => Some(1 << (log - 1)),
        LOG_INFINITE => Some(COUNT_INFINITE),
        _ => None,
    }
}

/// Expand a period log to seconds. Returns `None` for prohibited values.
pub fn expand_period_log(log: u8) -> Option<u32> {
    match log {
        0 => Some(0),
        1..=MAX_LOG => Some(1 << (log - 1)),
        _ => None,
    }
}

/// Smallest log whose expansion is at least `value`
pub fn log_of(value: u32) -> u8 {
    match value {
        0 => 0x00,
        1 => 0x01,
        COUNT_INFINITE => LOG_INFINITE,
        n => {
            let bits = 32 - (n - 1).leading_zeros();
            (bits as u8 + 1).min(MAX_LOG)
        }
    }
}

/// Config Heartbeat Publication Set parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPublicationSet {
    /// Destination of heartbeat messages
    pub destination: u16,
    /// Number of heartbeats to send, log encoded
    pub count_log: u8,
    /// Period between heartbeats, log encoded
    pub period_log: u8,
    /// TTL to publish with
    pub ttl: u8,
    /// Features that trigger heartbeats
    pub features: Features,
    /// NetKey index to publish under
    pub netkey_index: u16,
}

impl HeartbeatPublicationSet {
    /// Parse and validate the parameters. Prohibited log values and TTLs are errors.
    pub fn parse(params: &[u8]) -> Result<Self, WireError> {
        ensure_len(params, HEARTBEAT_PUBLICATION_SET_LEN)?;

        let set = Self {
            destination: read_u16_le(params, 0)?,
            count_log: read_u8(params, 2)?,
            period_log: read_u8(params, 3)?,
            ttl: read_u8(params, 4)?,
            features: Features::from_bits_truncate(read_u16_le(params, 5)?),
            netkey_index: read_u16_le(params, 7)? & 0x0FFF,
        };

        if expand_count_log(set.count_log).is_none() {
            return Err(WireError::ProhibitedLog(set.count_log));
        }
        if expand_period_log(set.period_log).is_none() {
            return Err(WireError::ProhibitedLog(set.period_log));
        }
        if set.ttl > MAX_HEARTBEAT_TTL {
            return Err(WireError::Ttl(set.ttl));
        }

        Ok(set)
    }
}

/// Config Heartbeat Publication Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPublicationStatus {
    /// Status code
    pub status: StatusCode,
    /// Destination of heartbeat messages
    pub destination: u16,
    /// Remaining count, log encoded
    pub count_log: u8,
    /// Period, log encoded
    pub period_log: u8,
    /// Publish TTL
    pub ttl: u8,
    /// Trigger features
    pub features: Features,
    /// NetKey index
    pub netkey_index: u16,
}

impl HeartbeatPublicationStatus {
    /// Encode the status parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10);
        buf.put_u8(self.status as u8);
        buf.put_u16_le(self.destination);
        buf.put_u8(self.count_log);
        buf.put_u8(self.period_log);
        buf.put_u8(self.ttl);
        buf.put_u16_le(self.features.bits());
        buf.put_u16_le(self.netkey_index);
        buf.freeze()
    }
}

/// Heartbeat transport control payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMessage {
    /// TTL the heartbeat was sent with
    pub init_ttl: u8,
    /// Currently active features
    pub features: Features,
}

impl HeartbeatMessage {
    /// Encode as TTL octet followed by big-endian features
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(self.init_ttl & 0x7F);
        buf.put_u16(self.features.bits());
        buf.freeze()
    }
}
