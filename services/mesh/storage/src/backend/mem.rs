//! In-memory storage backend for development and testing

use crate::{AppKeyRecord, AppKeyStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory application key store
#[derive(Clone, Default)]
pub struct MemoryAppKeyStore {
    /// Records by AppKey index
    records: Arc<DashMap<u16, AppKeyRecord>>,
}

impl MemoryAppKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AppKeyStore for MemoryAppKeyStore {
    async fn store(&self, record: AppKeyRecord) -> Result<(), StorageError> {
        debug!(
            "AppKey store index=0x{:03x} aid=0x{:02x}",
            record.appkey_index, record.aid
        );
        self.records.insert(record.appkey_index, record);
        Ok(())
    }

    async fn load(&self, appkey_index: u16) -> Result<Option<AppKeyRecord>, StorageError> {
        Ok(self.records.get(&appkey_index).map(|r| r.clone()))
    }

    async fn load_all(&self) -> Result<Vec<AppKeyRecord>, StorageError> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.appkey_index);
        Ok(records)
    }
}
