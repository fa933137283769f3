//! Recording fakes shared by the unit tests.

use crate::crypto::{CryptoError, KeyDerivation};
use crate::timer::{Scheduler, TimerHandle};
use crate::transport::{AccessPdu, AccessTransport, ControlPdu, OutboundPdu, TransportError};
use async_trait::async_trait;
use mesh_storage::{AppKeyRecord, AppKeyStore, StorageError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Application key from the mesh sample data set
pub const SAMPLE_APP_KEY: [u8; 16] = [
    0x32, 0x16, 0xD1, 0x50, 0x98, 0x84, 0xB5, 0x33, 0x24, 0x85, 0x41, 0x79, 0x2B, 0x87, 0x7F, 0x98,
];
/// AID of [`SAMPLE_APP_KEY`]
pub const SAMPLE_AID: u8 = 0x38;

#[derive(Default)]
struct ManualState {
    next_id: u64,
    armed: Vec<(TimerHandle, Duration)>,
    cancelled: Vec<TimerHandle>,
}

/// Scheduler whose timers expire only when a test says so.
/// Clones share state, so a boxed copy can be inspected through another.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of the timers still armed, oldest first
    pub fn armed(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap();
        state.armed.iter().map(|(_, delay)| *delay).collect()
    }

    pub fn cancelled(&self) -> Vec<TimerHandle> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// Expire the oldest armed timer
    pub fn expire(&self) -> Option<TimerHandle> {
        let mut state = self.state.lock().unwrap();
        if state.armed.is_empty() {
            return None;
        }
        Some(state.armed.remove(0).0)
    }
}

impl Scheduler for ManualScheduler {
    fn arm(&mut self, delay: Duration) -> TimerHandle {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let handle = TimerHandle::from_raw(state.next_id);
        state.armed.push((handle, delay));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        let mut state = self.state.lock().unwrap();
        state.armed.retain(|(h, _)| *h != handle);
        state.cancelled.push(handle);
    }
}

/// Transport that records everything it is handed
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundPdu>>,
    refusing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn access(&self) -> Vec<AccessPdu> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|pdu| match pdu {
                OutboundPdu::Access(pdu) => Some(pdu.clone()),
                OutboundPdu::Control(_) => None,
            })
            .collect()
    }

    pub fn control(&self) -> Vec<ControlPdu> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|pdu| match pdu {
                OutboundPdu::Control(pdu) => Some(pdu.clone()),
                OutboundPdu::Access(_) => None,
            })
            .collect()
    }

    fn record(&self, pdu: OutboundPdu) -> Result<(), TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Refused("no buffers".to_string()));
        }
        self.sent.lock().unwrap().push(pdu);
        Ok(())
    }
}

impl AccessTransport for RecordingTransport {
    fn send_access(&self, pdu: AccessPdu) -> Result<(), TransportError> {
        self.record(OutboundPdu::Access(pdu))
    }

    fn send_control(&self, pdu: ControlPdu) -> Result<(), TransportError> {
        self.record(OutboundPdu::Control(pdu))
    }
}

/// Key derivation returning a fixed result
pub enum FakeCrypto {
    Aid(u8),
    Fail,
}

#[async_trait]
impl KeyDerivation for FakeCrypto {
    async fn derive_aid(&self, _app_key: &[u8; 16]) -> Result<u8, CryptoError> {
        match self {
            FakeCrypto::Aid(aid) => Ok(*aid),
            FakeCrypto::Fail => Err(CryptoError::Failed("cmac engine busy".to_string())),
        }
    }
}

/// Store that refuses every write
pub struct FailingStore;

#[async_trait]
impl AppKeyStore for FailingStore {
    async fn store(&self, _record: AppKeyRecord) -> Result<(), StorageError> {
        Err(StorageError::Invalid("read-only store".to_string()))
    }

    async fn load(&self, _appkey_index: u16) -> Result<Option<AppKeyRecord>, StorageError> {
        Ok(None)
    }

    async fn load_all(&self) -> Result<Vec<AppKeyRecord>, StorageError> {
        Ok(Vec::new())
    }
}
