//! Application key persistence for the mesh configuration server.
//!
//! The configuration server persists every application key it accepts so the
//! node can restore its key table on restart. The storage contract is the
//! [`AppKeyStore`] trait; this crate ships an in-memory backend (dev/tests)
//! and a file backend that keeps one checksummed record per key index.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A stored application key
#[derive(Clone, PartialEq, Eq)]
pub struct AppKeyRecord {
    /// AppKey index (12 bits)
    pub appkey_index: u16,
    /// Application key identifier derived from the key
    pub aid: u8,
    /// Key material
    pub key: [u8; 16],
}

impl fmt::Debug for AppKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppKeyRecord")
            .field("appkey_index", &self.appkey_index)
            .field("aid", &self.aid)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
}

/// Persistent application key store
#[async_trait]
pub trait AppKeyStore: Send + Sync {
    /// Store a key, replacing any key with the same index
    async fn store(&self, record: AppKeyRecord) -> Result<(), StorageError>;

    /// Load the key stored under `appkey_index`
    async fn load(&self, appkey_index: u16) -> Result<Option<AppKeyRecord>, StorageError>;

    /// Load every stored key, ordered by index
    async fn load_all(&self) -> Result<Vec<AppKeyRecord>, StorageError>;
}

/// Storage backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// One record file per key index
    File {
        /// Data directory path
        data_dir: PathBuf,
        /// Fsync each record after writing
        fsync: bool,
    },
}

// Re-export backend implementations
pub use backend::file::{FileAppKeyStore, FileStoreConfig};
pub use backend::mem::MemoryAppKeyStore;

/// Combined storage interface
#[derive(Clone)]
pub struct Storage {
    /// Application key store
    pub app_keys: Arc<dyn AppKeyStore>,
}

impl Storage {
    /// Create storage from configuration
    pub async fn from_mode(mode: StorageMode) -> Result<Self, StorageError> {
        let app_keys: Arc<dyn AppKeyStore> = match mode {
            StorageMode::InMemory => Arc::new(MemoryAppKeyStore::new()),
            StorageMode::File { data_dir, fsync } => {
                Arc::new(FileAppKeyStore::open(FileStoreConfig { data_dir, fsync }).await?)
            }
        };
        Ok(Storage { app_keys })
    }
}
