//! Foundation model status codes.

use serde::{Deserialize, Serialize};

/// Status code carried in the first octet of configuration status messages
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Success
    Success = 0x00,
    /// Invalid address
    InvalidAddress = 0x01,
    /// Invalid model
    InvalidModel = 0x02,
    /// Invalid AppKey index
    InvalidAppKeyIndex = 0x03,
    /// Invalid NetKey index
    InvalidNetKeyIndex = 0x04,
    /// Insufficient resources
    InsufficientResources = 0x05,
    /// Key index already stored
    KeyIndexAlreadyStored = 0x06,
    /// Invalid publish parameters
    InvalidPublishParameters = 0x07,
    /// Not a subscribe model
    NotASubscribeModel = 0x08,
    /// Storage failure
    StorageFailure = 0x09,
    /// Feature not supported
    FeatureNotSupported = 0x0A,
    /// Cannot update
    CannotUpdate = 0x0B,
    /// Cannot remove
    CannotRemove = 0x0C,
    /// Cannot bind
    CannotBind = 0x0D,
    /// Temporarily unable to change state
    TemporarilyUnable = 0x0E,
    /// Cannot set
    CannotSet = 0x0F,
    /// Unspecified error
    Unspecified = 0x10,
    /// Invalid binding
    InvalidBinding = 0x11,
}

impl TryFrom<u8> for StatusCode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => StatusCode::Success,
            0x01 => StatusCode::InvalidAddress,
            0x02 => StatusCode::InvalidModel,
            0x03 => StatusCode::InvalidAppKeyIndex,
            0x04 => StatusCode::InvalidNetKeyIndex,
            0x05 => StatusCode::InsufficientResources,
            0x06 => StatusCode::KeyIndexAlreadyStored,
            0x07 => StatusCode::InvalidPublishParameters,
            0x08 => StatusCode::NotASubscribeModel,
            0x09 => StatusCode::StorageFailure,
            0x0A => StatusCode::FeatureNotSupported,
            0x0B => StatusCode::CannotUpdate,
            0x0C => StatusCode::CannotRemove,
            0x0D => StatusCode::CannotBind,
            0x0E => StatusCode::TemporarilyUnable,
            0x0F => StatusCode::CannotSet,
            0x10 => StatusCode::Unspecified,
            0x11 => StatusCode::InvalidBinding,
            _ => return Err(crate::WireError::Status(value)),
        })
    }
}
