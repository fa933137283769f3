//! Event loop owning a configuration server.
//!
//! The runtime task is the single owner of the [`ConfigurationServer`]. It
//! serialises inbound messages, timer expiries and AID derivation completions
//! so each is applied to the server as one atomic step.

use crate::appkey::AidDerived;
use crate::error::FoundationError;
use crate::operation::DispatchOutcome;
use crate::server::{Collaborators, ConfigurationServer, ServerConfig, ServerSnapshot};
use crate::timer::{TimerHandle, TokioScheduler};
use mesh_storage::{AppKeyStore, StorageError};
use mesh_wire::AccessMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Requests accepted by the runtime
#[derive(Debug)]
pub enum Command {
    /// Dispatch an inbound access message
    Deliver(AccessMessage),
    /// Dispatch and report the outcome
    DeliverWithOutcome(AccessMessage, oneshot::Sender<DispatchOutcome>),
    /// Report the current server state
    Snapshot(oneshot::Sender<ServerSnapshot>),
    /// Stop the event loop
    Shutdown,
}

/// Cloneable handle to a running runtime
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    /// Queue an inbound access message
    pub async fn deliver(&self, msg: AccessMessage) -> Result<(), FoundationError> {
        self.send(Command::Deliver(msg)).await
    }

    /// Dispatch an inbound access message and wait for the outcome
    pub async fn dispatch(&self, msg: AccessMessage) -> Result<DispatchOutcome, FoundationError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::DeliverWithOutcome(msg, tx)).await?;
        rx.await.map_err(|_| FoundationError::Stopped)
    }

    /// Read a snapshot of the server state
    pub async fn snapshot(&self) -> Result<ServerSnapshot, FoundationError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| FoundationError::Stopped)
    }

    /// Ask the event loop to stop
    pub async fn shutdown(&self) -> Result<(), FoundationError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), FoundationError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FoundationError::Stopped)
    }
}

/// Event loop state
pub struct Runtime {
    server: ConfigurationServer,
    store: Arc<dyn AppKeyStore>,
    commands: mpsc::Receiver<Command>,
    expired: mpsc::UnboundedReceiver<TimerHandle>,
    derived: mpsc::UnboundedReceiver<AidDerived>,
}

impl Runtime {
    /// Build a server on a tokio scheduler. `capacity` bounds the command queue.
    pub fn new(
        config: ServerConfig,
        collaborators: Collaborators,
        capacity: usize,
    ) -> (Self, RuntimeHandle) {
        let (scheduler, expired) = TokioScheduler::new();
        let (derived_tx, derived) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::channel(capacity);

        let store = collaborators.store.clone();
        let server =
            ConfigurationServer::new(config, collaborators, Box::new(scheduler), derived_tx);

        let runtime = Self {
            server,
            store,
            commands,
            expired,
            derived,
        };
        (runtime, RuntimeHandle { commands: commands_tx })
    }

    /// Load persisted application keys into the server. Returns how many were restored.
    pub async fn restore(&mut self) -> Result<usize, StorageError> {
        let records = self.store.load_all().await?;
        let restored = records.len();
        self.server.restore_app_keys(records);
        if restored > 0 {
            info!(component = "appkey", "Restored {} application keys", restored);
        }
        Ok(restored)
    }

    /// Server owned by this runtime
    pub fn server(&self) -> &ConfigurationServer {
        &self.server
    }

    /// Run until shut down or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            "Configuration server running on element 0x{:04x}",
            self.server.config().primary_element_address
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Deliver(msg)) => {
                            self.server.handle_message(&msg);
                        }
                        Some(Command::DeliverWithOutcome(msg, reply)) => {
                            let outcome = self.server.handle_message(&msg);
                            let _ = reply.send(outcome);
                        }
                        Some(Command::Snapshot(reply)) => {
                            let _ = reply.send(self.server.snapshot());
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }

                Some(handle) = self.expired.recv() => {
                    self.server.on_timer(handle);
                }

                Some(done) = self.derived.recv() => {
                    debug!(component = "appkey", "Derivation {} finished", done.request_id);
                    self.server.on_aid_derived(done);
                }
            }
        }

        info!("Configuration server shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::HeartbeatState;
    use crate::testing::{FakeCrypto, SAMPLE_AID, SAMPLE_APP_KEY};
    use crate::transport::{ChannelTransport, OutboundPdu};
    use crate::virtual_address::VirtualAddressTable;
    use mesh_storage::{AppKeyRecord, MemoryAppKeyStore};
    use std::time::Duration;

    fn collaborators(
        store: Arc<MemoryAppKeyStore>,
    ) -> (Collaborators, mpsc::UnboundedReceiver<OutboundPdu>) {
        let (transport, outbound) = ChannelTransport::new();
        let collaborators = Collaborators {
            transport: Arc::new(transport),
            crypto: Arc::new(FakeCrypto::Aid(SAMPLE_AID)),
            virtual_addresses: Arc::new(VirtualAddressTable::new()),
            store,
        };
        (collaborators, outbound)
    }

    fn heartbeat_set(count_log: u8, period_log: u8) -> AccessMessage {
        AccessMessage::new(
            0x0001,
            0x0002,
            0,
            vec![0x80, 0x39, 0x01, 0x00, count_log, period_log, 0x05, 0x00, 0x00, 0x00, 0x00],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_runs_on_tokio_timers() {
        let (collaborators, mut outbound) = collaborators(Arc::new(MemoryAppKeyStore::new()));
        let (runtime, handle) = Runtime::new(ServerConfig::default(), collaborators, 16);
        let task = tokio::spawn(runtime.run());

        let outcome = handle.dispatch(heartbeat_set(0x02, 0x02)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled("Heartbeat Publication Set"));
        assert!(matches!(outbound.recv().await, Some(OutboundPdu::Access(_))));

        let start = tokio::time::Instant::now();
        let first = outbound.recv().await.unwrap();
        assert!(matches!(first, OutboundPdu::Control(ref pdu) if pdu.dst == 0x0001));
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        let second = outbound.recv().await.unwrap();
        assert!(matches!(second, OutboundPdu::Control(_)));
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.heartbeat_state, HeartbeatState::Disabled);
        assert_eq!(snapshot.heartbeat.count, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_appkey_add_completes_through_loop() {
        let store = Arc::new(MemoryAppKeyStore::new());
        let (collaborators, mut outbound) = collaborators(store.clone());
        let (runtime, handle) = Runtime::new(ServerConfig::default(), collaborators, 16);
        let task = tokio::spawn(runtime.run());

        let mut data = vec![0x00, 0x00, 0x10, 0x00];
        let mut key = SAMPLE_APP_KEY;
        key.reverse();
        data.extend_from_slice(&key);
        handle
            .deliver(AccessMessage::new(0x0001, 0x0001, 0, data))
            .await
            .unwrap();

        match outbound.recv().await.unwrap() {
            OutboundPdu::Access(pdu) => {
                assert_eq!(pdu.payload().as_ref(), &[0x80, 0x03, 0x00, 0x00, 0x10, 0x00]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.app_keys.len(), 1);
        assert_eq!(snapshot.app_keys[0].aid, SAMPLE_AID);
        assert!(store.load(1).await.unwrap().is_some());

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_installs_persisted_keys() {
        let store = Arc::new(MemoryAppKeyStore::new());
        store
            .store(AppKeyRecord {
                appkey_index: 7,
                aid: SAMPLE_AID,
                key: SAMPLE_APP_KEY,
            })
            .await
            .unwrap();

        let (collaborators, _outbound) = collaborators(store);
        let (mut runtime, _handle) = Runtime::new(ServerConfig::default(), collaborators, 16);
        assert_eq!(runtime.restore().await.unwrap(), 1);
        assert_eq!(runtime.server().app_key(7).unwrap().aid, SAMPLE_AID);
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_runtime() {
        let (collaborators, _outbound) = collaborators(Arc::new(MemoryAppKeyStore::new()));
        let (runtime, handle) = Runtime::new(ServerConfig::default(), collaborators, 16);
        drop(runtime);

        assert!(matches!(
            handle.snapshot().await,
            Err(FoundationError::Stopped)
        ));
    }
}
