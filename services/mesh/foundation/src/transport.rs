//! Outbound transport contract.
//!
//! The configuration server hands finished PDUs to an [`AccessTransport`];
//! segmentation, encryption and bearers live behind it. Sends are
//! best-effort: a refusal is logged by the caller and never retried.

use bytes::Bytes;
use mesh_wire::{access_payload, Opcode};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport declined the PDU
    #[error("transport refused PDU: {0}")]
    Refused(String),

    /// The transport has shut down
    #[error("transport closed")]
    Closed,
}

/// Key used to secure an access PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityContext {
    /// The node's device key
    DeviceKey,
    /// An application key by index
    AppKey(u16),
    /// Network-layer security only
    NetworkKey(u16),
}

/// Outbound access message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPdu {
    /// Key used to secure the payload
    pub security: SecurityContext,
    /// NetKey index to send under
    pub netkey_index: u16,
    /// Source element address
    pub src: u16,
    /// Destination address
    pub dst: u16,
    /// Time to live
    pub ttl: u8,
    /// Message opcode
    pub opcode: Opcode,
    /// Encoded parameters, without the opcode
    pub parameters: Bytes,
    /// Send through the segmented path
    pub segmented: bool,
}

impl AccessPdu {
    /// Full access payload: opcode prefix followed by parameters
    pub fn payload(&self) -> Bytes {
        access_payload(self.opcode, &self.parameters)
    }
}

/// Outbound transport control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPdu {
    /// NetKey index to send under
    pub netkey_index: u16,
    /// Time to live
    pub ttl: u8,
    /// Source element address
    pub src: u16,
    /// Destination address
    pub dst: u16,
    /// Transport control opcode
    pub opcode: u8,
    /// Control parameters
    pub parameters: Bytes,
}

/// Sink for outbound PDUs
pub trait AccessTransport: Send + Sync {
    /// Queue an access message for transmission
    fn send_access(&self, pdu: AccessPdu) -> Result<(), TransportError>;

    /// Queue an unsegmented control message for transmission
    fn send_control(&self, pdu: ControlPdu) -> Result<(), TransportError>;
}

/// Either kind of outbound PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPdu {
    /// Access message
    Access(AccessPdu),
    /// Transport control message
    Control(ControlPdu),
}

/// Transport that forwards every PDU into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundPdu>,
}

impl ChannelTransport {
    /// Create the transport and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundPdu>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, pdu: OutboundPdu) -> Result<(), TransportError> {
        self.tx.send(pdu).map_err(|_| TransportError::Closed)
    }
}

impl AccessTransport for ChannelTransport {
    fn send_access(&self, pdu: AccessPdu) -> Result<(), TransportError> {
        self.forward(OutboundPdu::Access(pdu))
    }

    fn send_control(&self, pdu: ControlPdu) -> Result<(), TransportError> {
        self.forward(OutboundPdu::Control(pdu))
    }
}
