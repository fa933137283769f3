//! Error types for the configuration server.

use crate::transport::TransportError;
use mesh_wire::WireError;
use thiserror::Error;

/// Configuration server errors
#[derive(Error, Debug)]
pub enum FoundationError {
    /// Request parameters could not be decoded
    #[error("malformed parameters: {0}")]
    Wire(#[from] WireError),

    /// Transport refused an outbound PDU
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The runtime task has stopped
    #[error("configuration server runtime stopped")]
    Stopped,
}

impl FoundationError {
    /// Whether the error means the request was dropped without a response
    pub fn is_drop(&self) -> bool {
        matches!(self, FoundationError::Wire(_))
    }
}
