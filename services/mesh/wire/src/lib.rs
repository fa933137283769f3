//! Access-layer wire formats for the Bluetooth Mesh configuration server.
//!
//! This crate provides the bit-exact encodings the configuration server
//! speaks: the variable-width opcode prefix, the request parameter layouts of
//! the supported configuration messages, their status responses, and the
//! heartbeat control payload with its logarithmic count/period fields.
//!
//! ## Access Payload
//!
//! ```text
//! +----------------------+----------------------------+
//! | opcode (1..3B)       | width from top two bits    |
//! +----------------------+----------------------------+
//! | parameters (0..N)    | little-endian fields       |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod configuration;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod opcode;
pub mod status;

// Re-export main types
pub use configuration::{
    AppKeyAdd, AppKeyStatus, CompositionData, ElementComposition, KeyIndexPair,
    ModelAppBind, ModelAppStatus, ModelPublicationStatus, ModelPublicationVirtualAddressSet,
    ModelSubscriptionAdd, ModelSubscriptionStatus, ModelSubscriptionVirtualAddressAdd,
    PublishRetransmit,
};
pub use error::WireError;
pub use heartbeat::{
    expand_count_log, expand_period_log, log_of, Features, HeartbeatMessage,
    HeartbeatPublicationSet, HeartbeatPublicationStatus, COUNT_INFINITE,
    HEARTBEAT_CONTROL_OPCODE, LOG_INFINITE, MAX_LOG,
};
pub use message::{access_payload, is_unicast, AccessMessage, ModelId, UNASSIGNED_ADDRESS};
pub use opcode::{Opcode, RESERVED_OPCODE};
pub use status::StatusCode;
