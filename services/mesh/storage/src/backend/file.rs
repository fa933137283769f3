//! File-based storage backend with checksummed records

use crate::{AppKeyRecord, AppKeyStore, StorageError};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration for the file-based store
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Base data directory
    pub data_dir: PathBuf,
    /// Fsync each record after writing
    pub fsync: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./meshdata"),
            fsync: true,
        }
    }
}

/// On-disk record: index(2) | aid(1) | key(16) | crc32(4), little-endian
struct RecordCodec;

impl RecordCodec {
    const BODY: usize = 2 + 1 + 16;
    const SIZE: usize = Self::BODY + 4;

    fn encode(record: &AppKeyRecord) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u16_le(record.appkey_index);
        buf.put_u8(record.aid);
        buf.put_slice(&record.key);
        let crc = Self::compute_crc(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }

    fn decode(raw: &[u8]) -> Result<AppKeyRecord, StorageError> {
        if raw.len() != Self::SIZE {
            return Err(StorageError::Corruption(format!(
                "record length {} (expected {})",
                raw.len(),
                Self::SIZE
            )));
        }

        let expected = Self::compute_crc(&raw[..Self::BODY]);
        let mut buf = raw;
        let appkey_index = buf.get_u16_le();
        let aid = buf.get_u8();
        let mut key = [0u8; 16];
        buf.copy_to_slice(&mut key);
        let crc = buf.get_u32_le();

        if crc != expected {
            return Err(StorageError::Corruption(format!(
                "checksum mismatch for index 0x{:03x}",
                appkey_index
            )));
        }

        Ok(AppKeyRecord {
            appkey_index,
            aid,
            key,
        })
    }

    fn compute_crc(body: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(body);
        hasher.finalize()
    }
}

/// File-based application key store
pub struct FileAppKeyStore {
    config: FileStoreConfig,
}

impl FileAppKeyStore {
    /// Open the store, creating its directory if needed
    pub async fn open(config: FileStoreConfig) -> Result<Self, StorageError> {
        let store = Self { config };
        std::fs::create_dir_all(store.keys_dir())?;
        info!("AppKey store opened at {:?}", store.keys_dir());
        Ok(store)
    }

    fn keys_dir(&self) -> PathBuf {
        self.config.data_dir.join("appkeys")
    }

    fn record_path(&self, appkey_index: u16) -> PathBuf {
        self.keys_dir().join(format!("{:03x}.key", appkey_index))
    }

    fn read_record(path: &Path) -> Result<AppKeyRecord, StorageError> {
        let raw = std::fs::read(path)?;
        RecordCodec::decode(&raw)
    }
}

#[async_trait]
impl AppKeyStore for FileAppKeyStore {
    async fn store(&self, record: AppKeyRecord) -> Result<(), StorageError> {
        if record.appkey_index > 0x0FFF {
            return Err(StorageError::Invalid(format!(
                "AppKey index 0x{:x} exceeds 12 bits",
                record.appkey_index
            )));
        }

        let path = self.record_path(record.appkey_index);
        let tmp = path.with_extension("tmp");
        let encoded = RecordCodec::encode(&record);

        {
            let mut file: File = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&encoded)?;
            if self.config.fsync {
                file.sync_all()?;
            }
        }
        std::fs::rename(&tmp, &path)?;

        debug!(
            "AppKey persisted index=0x{:03x} aid=0x{:02x} path={:?}",
            record.appkey_index, record.aid, path
        );
        Ok(())
    }

    async fn load(&self, appkey_index: u16) -> Result<Option<AppKeyRecord>, StorageError> {
        let path = self.record_path(appkey_index);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    async fn load_all(&self) -> Result<Vec<AppKeyRecord>, StorageError> {
        let mut records = Vec::new();

        for entry in std::fs::read_dir(self.keys_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("key") {
                continue;
            }

            match Self::read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping AppKey record {:?}: {}", path, e),
            }
        }

        records.sort_by_key(|r| r.appkey_index);
        Ok(records)
    }
}
