//! Configuration model message layouts.
//!
//! Request parsers take the parameter slice that follows the opcode; status
//! encoders produce the parameters of the response without its opcode.
//! All multi-octet fields are little-endian.

use crate::error::{ensure_len, WireError};
use crate::message::{read_128, read_u16_le, read_u8, ModelId};
use crate::opcode::Opcode;
use crate::status::StatusCode;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Config AppKey Add
pub const APPKEY_ADD: Opcode = Opcode::single(0x00);
/// Config AppKey Status
pub const APPKEY_STATUS: Opcode = Opcode::double(0x8003);
/// Config Composition Data Get
pub const COMPOSITION_DATA_GET: Opcode = Opcode::double(0x8008);
/// Config Composition Data Status
pub const COMPOSITION_DATA_STATUS: Opcode = Opcode::single(0x02);
/// Config Model Publication Status
pub const MODEL_PUBLICATION_STATUS: Opcode = Opcode::double(0x8019);
/// Config Model Publication Virtual Address Set
pub const MODEL_PUBLICATION_VIRTUAL_ADDRESS_SET: Opcode = Opcode::double(0x801A);
/// Config Model Subscription Add
pub const MODEL_SUBSCRIPTION_ADD: Opcode = Opcode::double(0x801B);
/// Config Model Subscription Status
pub const MODEL_SUBSCRIPTION_STATUS: Opcode = Opcode::double(0x801F);
/// Config Model Subscription Virtual Address Add
pub const MODEL_SUBSCRIPTION_VIRTUAL_ADDRESS_ADD: Opcode = Opcode::double(0x8020);
/// Config Model App Bind
pub const MODEL_APP_BIND: Opcode = Opcode::double(0x803D);
/// Config Model App Status
pub const MODEL_APP_STATUS: Opcode = Opcode::double(0x803E);

/// Parameter length of a Model Publication Virtual Address Set with a SIG model id
pub const MODEL_PUBLICATION_VIRTUAL_ADDRESS_SET_LEN: usize = 25;

/// A NetKey index and AppKey index packed into three octets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyIndexPair {
    /// NetKey index (low 12 bits)
    pub netkey_index: u16,
    /// AppKey index (high 12 bits)
    pub appkey_index: u16,
}

impl KeyIndexPair {
    /// Unpack from the 24-bit little-endian wire form
    pub fn unpack(packed: u32) -> Self {
        Self {
            netkey_index: (packed & 0x0FFF) as u16,
            appkey_index: ((packed >> 12) & 0x0FFF) as u16,
        }
    }

    /// Pack into the 24-bit wire form
    pub fn pack(self) -> u32 {
        (self.netkey_index as u32 & 0x0FFF) | ((self.appkey_index as u32 & 0x0FFF) << 12)
    }

    fn read(params: &[u8], offset: usize) -> Result<Self, WireError> {
        ensure_len(params, offset + 3)?;
        let b = &params[offset..offset + 3];
        Ok(Self::unpack(u32::from_le_bytes([b[0], b[1], b[2], 0])))
    }

    fn encode(self, buf: &mut BytesMut) {
        let packed = self.pack();
        buf.put_u8(packed as u8);
        buf.put_u16_le((packed >> 8) as u16);
    }
}

/// Config AppKey Add parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppKeyAdd {
    /// Key indexes
    pub indexes: KeyIndexPair,
    /// Application key in big-endian (natural) order
    pub app_key: [u8; 16],
}

impl AppKeyAdd {
    /// Parse the parameters. The key arrives byte-reversed and is reversed back.
    pub fn parse(params: &[u8]) -> Result<Self, WireError> {
        let indexes = KeyIndexPair::read(params, 0)?;
        let mut app_key = read_128(params, 3)?;
        app_key.reverse();
        Ok(Self { indexes, app_key })
    }
}

/// Config AppKey Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppKeyStatus {
    /// Status code
    pub status: StatusCode,
    /// Key indexes from the request
    pub indexes: KeyIndexPair,
}

impl AppKeyStatus {
    /// Encode the status parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u8(self.status as u8);
        self.indexes.encode(&mut buf);
        buf.freeze()
    }
}

/// One element of the composition data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementComposition {
    /// Location descriptor
    pub location: u16,
    /// SIG model ids
    pub sig_models: SmallVec<[u16; 4]>,
    /// Vendor model ids
    #[serde(default)]
    pub vendor_models: SmallVec<[u32; 2]>,
}

/// Composition data page 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionData {
    /// Company identifier
    pub cid: u16,
    /// Product identifier
    pub pid: u16,
    /// Version identifier
    pub vid: u16,
    /// Minimum replay protection list entries
    pub crpl: u16,
    /// Supported features
    pub features: u16,
    /// Elements in address order
    pub elements: Vec<ElementComposition>,
}

impl Default for CompositionData {
    fn default() -> Self {
        Self {
            cid: 0x0048,
            pid: 0x0000,
            vid: 0x0000,
            crpl: 1,
            features: 0,
            elements: vec![ElementComposition {
                location: 0x0103,
                sig_models: SmallVec::from_slice(&[0x0000, 0x0002]),
                vendor_models: SmallVec::new(),
            }],
        }
    }
}

impl CompositionData {
    /// Encode a Composition Data Status for `page`
    pub fn encode_status(&self, page: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(11 + self.elements.len() * 8);
        buf.put_u8(page);
        buf.put_u16_le(self.cid);
        buf.put_u16_le(self.pid);
        buf.put_u16_le(self.vid);
        buf.put_u16_le(self.crpl);
        buf.put_u16_le(self.features);

        for element in &self.elements {
            buf.put_u16_le(element.location);
            buf.put_u8(element.sig_models.len() as u8);
            buf.put_u8(element.vendor_models.len() as u8);
            for id in &element.sig_models {
                buf.put_u16_le(*id);
            }
            for id in &element.vendor_models {
                buf.put_u32_le(*id);
            }
        }

        buf.freeze()
    }
}

/// Config Model Subscription Add parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSubscriptionAdd {
    /// Element address
    pub element_address: u16,
    /// Subscription address
    pub address: u16,
    /// Model id
    pub model_id: ModelId,
}

impl ModelSubscriptionAdd {
    /// Parse the parameters
    pub fn parse(params: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            element_address: read_u16_le(params, 0)?,
            address: read_u16_le(params, 2)?,
            model_id: ModelId::read(params, 4)?,
        })
    }
}

/// Config Model Subscription Virtual Address Add parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSubscriptionVirtualAddressAdd {
    /// Element address
    pub element_address: u16,
    /// Label UUID of the virtual address
    pub label: [u8; 16],
    /// Model id
    pub model_id: ModelId,
}

impl ModelSubscriptionVirtualAddressAdd {
    /// Parse the parameters
    pub fn parse(params: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            element_address: read_u16_le(params, 0)?,
            label: read_128(params, 2)?,
            model_id: ModelId::read(params, 18)?,
        })
    }
}

/// Config Model Subscription Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSubscriptionStatus {
    /// Status code
    pub status: StatusCode,
    /// Element address
    pub element_address: u16,
    /// Subscription address
    pub address: u16,
    /// Model id
    pub model_id: ModelId,
}

impl ModelSubscriptionStatus {
    /// Encode the status parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.model_id.width());
        buf.put_u8(self.status as u8);
        buf.put_u16_le(self.element_address);
        buf.put_u16_le(self.address);
        self.model_id.encode(&mut buf);
        buf.freeze()
    }
}

/// Publish retransmission: count (3 bits) and interval steps (5 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRetransmit {
    /// Number of retransmissions
    pub count: u8,
    /// Interval steps between retransmissions
    pub interval_steps: u8,
}

impl PublishRetransmit {
    /// Unpack from the wire octet
    pub fn unpack(raw: u8) -> Self {
        Self {
            count: raw & 0x07,
            interval_steps: raw >> 3,
        }
    }

    /// Pack into the wire octet
    pub fn pack(self) -> u8 {
        (self.interval_steps << 3) | (self.count & 0x07)
    }
}

/// Config Model Publication Virtual Address Set parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPublicationVirtualAddressSet {
    /// Element address
    pub element_address: u16,
    /// Label UUID of the publish address
    pub label: [u8; 16],
    /// AppKey index (12 bits)
    pub appkey_index: u16,
    /// Friendship credential flag
    pub credential_flag: bool,
    /// Publish TTL
    pub ttl: u8,
    /// Publish period
    pub period: u8,
    /// Publish retransmission
    pub retransmit: PublishRetransmit,
    /// Model id
    pub model_id: ModelId,
}

impl ModelPublicationVirtualAddressSet {
    /// Parse the parameters
    pub fn parse(params: &[u8]) -> Result<Self, WireError> {
        ensure_len(params, MODEL_PUBLICATION_VIRTUAL_ADDRESS_SET_LEN)?;
        let key_field = read_u16_le(params, 18)?;

        Ok(Self {
            element_address: read_u16_le(params, 0)?,
            label: read_128(params, 2)?,
            appkey_index: key_field & 0x0FFF,
            credential_flag: (key_field >> 12) & 1 == 1,
            ttl: read_u8(params, 20)?,
            period: read_u8(params, 21)?,
            retransmit: PublishRetransmit::unpack(read_u8(params, 22)?),
            model_id: ModelId::read(params, 23)?,
        })
    }
}

/// Config Model Publication Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPublicationStatus {
    /// Status code
    pub status: StatusCode,
    /// Element address
    pub element_address: u16,
    /// Resolved publish address
    pub publish_address: u16,
    /// AppKey index (12 bits)
    pub appkey_index: u16,
    /// Friendship credential flag
    pub credential_flag: bool,
    /// Publish TTL
    pub ttl: u8,
    /// Publish period
    pub period: u8,
    /// Publish retransmission
    pub retransmit: PublishRetransmit,
    /// Model id
    pub model_id: ModelId,
}

impl ModelPublicationStatus {
    /// Encode the status parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10 + self.model_id.width());
        buf.put_u8(self.status as u8);
        buf.put_u16_le(self.element_address);
        buf.put_u16_le(self.publish_address);
        buf.put_u16_le((self.appkey_index & 0x0FFF) | ((self.credential_flag as u16) << 12));
        buf.put_u8(self.ttl);
        buf.put_u8(self.period);
        buf.put_u8(self.retransmit.pack());
        self.model_id.encode(&mut buf);
        buf.freeze()
    }
}

/// Config Model App Bind parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAppBind {
    /// Element address
    pub element_address: u16,
    /// AppKey index
    pub appkey_index: u16,
    /// Model id
    pub model_id: ModelId,
}

impl ModelAppBind {
    /// Parse the parameters
    pub fn parse(params: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            element_address: read_u16_le(params, 0)?,
            appkey_index: read_u16_le(params, 2)?,
            model_id: ModelId::read(params, 4)?,
        })
    }
}

/// Config Model App Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAppStatus {
    /// Status code
    pub status: StatusCode,
    /// Element address
    pub element_address: u16,
    /// AppKey index
    pub appkey_index: u16,
    /// Model id
    pub model_id: ModelId,
}

impl ModelAppStatus {
    /// Encode the status parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.model_id.width());
        buf.put_u8(self.status as u8);
        buf.put_u16_le(self.element_address);
        buf.put_u16_le(self.appkey_index);
        self.model_id.encode(&mut buf);
        buf.freeze()
    }
}
