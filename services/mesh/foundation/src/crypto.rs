//! Key derivation contract.

use async_trait::async_trait;
use thiserror::Error;

/// Crypto collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The derivation could not be completed
    #[error("key derivation failed: {0}")]
    Failed(String),
}

/// Derives application key identifiers (the k4 function)
#[async_trait]
pub trait KeyDerivation: Send + Sync {
    /// Derive the 6-bit AID of an application key
    async fn derive_aid(&self, app_key: &[u8; 16]) -> Result<u8, CryptoError>;
}
