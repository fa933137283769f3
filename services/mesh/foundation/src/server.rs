//! Configuration Server model.
//!
//! [`ConfigurationServer`] owns the node's configuration state: the
//! application key table, the model subscriptions, publications and bindings
//! accepted so far, and the heartbeat publication. Inbound messages reach it
//! through the operation table; every response is a segmented access message
//! secured with the device key and addressed back to the requester.

use crate::appkey::{spawn_derivation, AidDerived, AppKeyProvisioning, PendingAppKey, ReplyTo};
use crate::crypto::KeyDerivation;
use crate::error::FoundationError;
use crate::heartbeat::{HeartbeatPublication, HeartbeatState};
use crate::operation::{dispatch, DispatchOutcome, OperationEntry};
use crate::timer::{Scheduler, TimerHandle};
use crate::transport::{AccessPdu, AccessTransport, SecurityContext};
use crate::virtual_address::VirtualAddressResolver;
use bytes::Bytes;
use mesh_storage::{AppKeyRecord, AppKeyStore};
use mesh_wire::configuration::{
    APPKEY_ADD, APPKEY_STATUS, COMPOSITION_DATA_GET, COMPOSITION_DATA_STATUS, MODEL_APP_BIND,
    MODEL_APP_STATUS, MODEL_PUBLICATION_STATUS, MODEL_PUBLICATION_VIRTUAL_ADDRESS_SET,
    MODEL_SUBSCRIPTION_ADD, MODEL_SUBSCRIPTION_STATUS, MODEL_SUBSCRIPTION_VIRTUAL_ADDRESS_ADD,
};
use mesh_wire::heartbeat::{
    HEARTBEAT_PUBLICATION_GET, HEARTBEAT_PUBLICATION_SET, HEARTBEAT_PUBLICATION_STATUS,
};
use mesh_wire::{
    AccessMessage, AppKeyAdd, AppKeyStatus, CompositionData, HeartbeatPublicationSet, ModelAppBind,
    ModelAppStatus, ModelId, ModelPublicationStatus, ModelPublicationVirtualAddressSet,
    ModelSubscriptionAdd, ModelSubscriptionStatus, ModelSubscriptionVirtualAddressAdd, Opcode,
    PublishRetransmit, StatusCode, UNASSIGNED_ADDRESS,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default TTL of configuration responses
pub const DEFAULT_RESPONSE_TTL: u8 = 10;

/// Default delay between a Heartbeat Publication Set and the first heartbeat
pub const DEFAULT_HEARTBEAT_GRACE: Duration = Duration::from_millis(2000);

/// Static configuration of a configuration server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unicast address of the node's primary element
    pub primary_element_address: u16,
    /// TTL of configuration responses
    pub response_ttl: u8,
    /// Delay before the first heartbeat of a new publication
    pub heartbeat_grace: Duration,
    /// Composition data page 0
    pub composition: CompositionData,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            primary_element_address: 0x0001,
            response_ttl: DEFAULT_RESPONSE_TTL,
            heartbeat_grace: DEFAULT_HEARTBEAT_GRACE,
            composition: CompositionData::default(),
        }
    }
}

/// External services the server relies on
#[derive(Clone)]
pub struct Collaborators {
    /// Outbound transport
    pub transport: Arc<dyn AccessTransport>,
    /// AID derivation
    pub crypto: Arc<dyn KeyDerivation>,
    /// Label UUID registry
    pub virtual_addresses: Arc<dyn VirtualAddressResolver>,
    /// Application key persistence
    pub store: Arc<dyn AppKeyStore>,
}

/// An accepted model subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Element address
    pub element_address: u16,
    /// Subscribed address
    pub address: u16,
    /// Model id
    pub model_id: ModelId,
}

/// An accepted model publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Element address
    pub element_address: u16,
    /// Publish address
    pub publish_address: u16,
    /// AppKey index
    pub appkey_index: u16,
    /// Friendship credential flag
    pub credential_flag: bool,
    /// Publish TTL
    pub ttl: u8,
    /// Publish period
    pub period: u8,
    /// Publish retransmission
    pub retransmit: PublishRetransmit,
    /// Model id
    pub model_id: ModelId,
}

/// An accepted model to AppKey binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBinding {
    /// Element address
    pub element_address: u16,
    /// AppKey index
    pub appkey_index: u16,
    /// Model id
    pub model_id: ModelId,
}

/// An installed application key, without key material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledAppKey {
    /// AppKey index
    pub appkey_index: u16,
    /// Application key identifier
    pub aid: u8,
}

/// Point-in-time copy of the server state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    /// Heartbeat publication
    pub heartbeat: HeartbeatPublication,
    /// Heartbeat publication state
    pub heartbeat_state: HeartbeatState,
    /// Installed application keys, by index
    pub app_keys: Vec<InstalledAppKey>,
    /// AppKey Add requests pending or queued
    pub appkeys_outstanding: usize,
    /// Model subscriptions
    pub subscriptions: Vec<Subscription>,
    /// Model publications
    pub publications: Vec<Publication>,
    /// Model to AppKey bindings
    pub bindings: Vec<AppBinding>,
}

static OPERATIONS: [OperationEntry<ConfigurationServer>; 8] = [
    OperationEntry {
        opcode: APPKEY_ADD,
        min_len: 19,
        name: "AppKey Add",
        handler: ConfigurationServer::appkey_add,
    },
    OperationEntry {
        opcode: COMPOSITION_DATA_GET,
        min_len: 0,
        name: "Composition Data Get",
        handler: ConfigurationServer::composition_data_get,
    },
    OperationEntry {
        opcode: MODEL_SUBSCRIPTION_ADD,
        min_len: 6,
        name: "Model Subscription Add",
        handler: ConfigurationServer::model_subscription_add,
    },
    OperationEntry {
        opcode: MODEL_SUBSCRIPTION_VIRTUAL_ADDRESS_ADD,
        min_len: 20,
        name: "Model Subscription Virtual Address Add",
        handler: ConfigurationServer::model_subscription_virtual_address_add,
    },
    OperationEntry {
        opcode: MODEL_PUBLICATION_VIRTUAL_ADDRESS_SET,
        min_len: 24,
        name: "Model Publication Virtual Address Set",
        handler: ConfigurationServer::model_publication_virtual_address_set,
    },
    OperationEntry {
        opcode: MODEL_APP_BIND,
        min_len: 6,
        name: "Model App Bind",
        handler: ConfigurationServer::model_app_bind,
    },
    OperationEntry {
        opcode: HEARTBEAT_PUBLICATION_GET,
        min_len: 0,
        name: "Heartbeat Publication Get",
        handler: ConfigurationServer::heartbeat_publication_get,
    },
    OperationEntry {
        opcode: HEARTBEAT_PUBLICATION_SET,
        min_len: 5,
        name: "Heartbeat Publication Set",
        handler: ConfigurationServer::heartbeat_publication_set,
    },
];

/// Operation table of the configuration server, in dispatch order
pub fn operations() -> &'static [OperationEntry<ConfigurationServer>] {
    &OPERATIONS
}

/// Configuration Server model instance
pub struct ConfigurationServer {
    config: ServerConfig,
    collaborators: Collaborators,
    scheduler: Box<dyn Scheduler>,
    completions: mpsc::UnboundedSender<AidDerived>,
    app_keys: HashMap<u16, AppKeyRecord>,
    appkeys: AppKeyProvisioning,
    heartbeat: HeartbeatPublication,
    subscriptions: Vec<Subscription>,
    publications: Vec<Publication>,
    bindings: Vec<AppBinding>,
}

impl ConfigurationServer {
    /// Create a server. Derivation completions are posted to `completions`
    /// and must be fed back through [`ConfigurationServer::on_aid_derived`].
    pub fn new(
        config: ServerConfig,
        collaborators: Collaborators,
        scheduler: Box<dyn Scheduler>,
        completions: mpsc::UnboundedSender<AidDerived>,
    ) -> Self {
        Self {
            config,
            collaborators,
            scheduler,
            completions,
            app_keys: HashMap::new(),
            appkeys: AppKeyProvisioning::new(),
            heartbeat: HeartbeatPublication::default(),
            subscriptions: Vec::new(),
            publications: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Heartbeat publication state
    pub fn heartbeat(&self) -> &HeartbeatPublication {
        &self.heartbeat
    }

    /// Installed application key by index
    pub fn app_key(&self, appkey_index: u16) -> Option<&AppKeyRecord> {
        self.app_keys.get(&appkey_index)
    }

    /// Install previously persisted keys
    pub fn restore_app_keys(&mut self, records: Vec<AppKeyRecord>) {
        for record in records {
            debug!(
                component = "appkey",
                "Restored AppKey index 0x{:03x} aid 0x{:02x}",
                record.appkey_index,
                record.aid
            );
            self.app_keys.insert(record.appkey_index, record);
        }
    }

    /// Dispatch an inbound access message
    pub fn handle_message(&mut self, msg: &AccessMessage) -> DispatchOutcome {
        dispatch(&OPERATIONS, self, msg)
    }

    /// Handle an expired timer
    pub fn on_timer(&mut self, handle: TimerHandle) {
        let src = self.config.primary_element_address;
        if let Some(pdu) = self.heartbeat.on_timer(handle, self.scheduler.as_mut(), src) {
            if let Err(e) = self.collaborators.transport.send_control(pdu) {
                warn!(component = "heartbeat", "Heartbeat not sent: {}", e);
            }
        }
    }

    /// Resolve a finished AID derivation and start the next queued one
    pub fn on_aid_derived(&mut self, done: AidDerived) {
        let Some(pending) = self.appkeys.complete(done.request_id) else {
            debug!(
                component = "appkey",
                "Ignoring completion for unknown request {}",
                done.request_id
            );
            return;
        };

        let indexes = pending.request.indexes;
        let status = match done.result {
            Ok(aid) => {
                self.app_keys.insert(
                    indexes.appkey_index,
                    AppKeyRecord {
                        appkey_index: indexes.appkey_index,
                        aid,
                        key: pending.request.app_key,
                    },
                );
                info!(
                    component = "appkey",
                    "AppKey installed: netkey 0x{:03x} appkey 0x{:03x} aid 0x{:02x}",
                    indexes.netkey_index,
                    indexes.appkey_index,
                    aid
                );
                StatusCode::Success
            }
            Err(e) => e.status_code(),
        };

        let parameters = AppKeyStatus { status, indexes }.encode();
        if let Err(e) = self.respond(pending.reply, APPKEY_STATUS, parameters) {
            warn!(component = "appkey", "AppKey Status not sent: {}", e);
        }

        if let Some(next) = self.appkeys.advance() {
            self.start_derivation(&next);
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ServerSnapshot {
        let mut app_keys: Vec<InstalledAppKey> = self
            .app_keys
            .values()
            .map(|record| InstalledAppKey {
                appkey_index: record.appkey_index,
                aid: record.aid,
            })
            .collect();
        app_keys.sort_by_key(|key| key.appkey_index);

        ServerSnapshot {
            heartbeat: self.heartbeat.clone(),
            heartbeat_state: self.heartbeat.state(),
            app_keys,
            appkeys_outstanding: self.appkeys.outstanding(),
            subscriptions: self.subscriptions.clone(),
            publications: self.publications.clone(),
            bindings: self.bindings.clone(),
        }
    }

    fn respond(
        &self,
        reply: ReplyTo,
        opcode: Opcode,
        parameters: Bytes,
    ) -> Result<(), FoundationError> {
        let pdu = AccessPdu {
            security: SecurityContext::DeviceKey,
            netkey_index: reply.netkey_index,
            src: self.config.primary_element_address,
            dst: reply.src,
            ttl: self.config.response_ttl,
            opcode,
            parameters,
            segmented: true,
        };
        self.collaborators.transport.send_access(pdu)?;
        Ok(())
    }

    fn start_derivation(&self, pending: &PendingAppKey) {
        debug!(
            component = "appkey",
            "Deriving AID for AppKey index 0x{:03x} (request {})",
            pending.request.indexes.appkey_index,
            pending.request_id
        );
        spawn_derivation(
            pending,
            self.collaborators.crypto.clone(),
            self.collaborators.store.clone(),
            self.completions.clone(),
        );
    }

    fn appkey_add(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        let request = AppKeyAdd::parse(params)?;
        let reply = reply_to(msg);
        if let Some(pending) = self.appkeys.submit(request, reply) {
            self.start_derivation(&pending);
        }
        Ok(())
    }

    fn composition_data_get(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        if let Some(page) = params.first().filter(|page| **page != 0) {
            debug!(
                component = "dispatch",
                "Composition page {} requested, reporting page 0",
                page
            );
        }
        let parameters = self.config.composition.encode_status(0);
        self.respond(reply_to(msg), COMPOSITION_DATA_STATUS, parameters)
    }

    fn model_subscription_add(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        let request = ModelSubscriptionAdd::parse(params)?;
        self.record_subscription(Subscription {
            element_address: request.element_address,
            address: request.address,
            model_id: request.model_id,
        });

        let parameters = ModelSubscriptionStatus {
            status: StatusCode::Success,
            element_address: request.element_address,
            address: request.address,
            model_id: request.model_id,
        }
        .encode();
        self.respond(reply_to(msg), MODEL_SUBSCRIPTION_STATUS, parameters)
    }

    fn model_subscription_virtual_address_add(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        let request = ModelSubscriptionVirtualAddressAdd::parse(params)?;
        let (status, address) = self.resolve_label(&request.label);

        if status == StatusCode::Success {
            self.record_subscription(Subscription {
                element_address: request.element_address,
                address,
                model_id: request.model_id,
            });
        }

        let parameters = ModelSubscriptionStatus {
            status,
            element_address: request.element_address,
            address,
            model_id: request.model_id,
        }
        .encode();
        self.respond(reply_to(msg), MODEL_SUBSCRIPTION_STATUS, parameters)
    }

    fn model_publication_virtual_address_set(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        let request = ModelPublicationVirtualAddressSet::parse(params)?;
        let (status, publish_address) = self.resolve_label(&request.label);

        let publication = Publication {
            element_address: request.element_address,
            publish_address,
            appkey_index: request.appkey_index,
            credential_flag: request.credential_flag,
            ttl: request.ttl,
            period: request.period,
            retransmit: request.retransmit,
            model_id: request.model_id,
        };

        if status == StatusCode::Success {
            info!(
                component = "dispatch",
                "Publication set: element 0x{:04x} model {} -> 0x{:04x}",
                publication.element_address, publication.model_id, publication.publish_address
            );
            self.publications.retain(|p| {
                p.element_address != publication.element_address
                    || p.model_id != publication.model_id
            });
            self.publications.push(publication.clone());
        }

        let parameters = ModelPublicationStatus {
            status,
            element_address: publication.element_address,
            publish_address: publication.publish_address,
            appkey_index: publication.appkey_index,
            credential_flag: publication.credential_flag,
            ttl: publication.ttl,
            period: publication.period,
            retransmit: publication.retransmit,
            model_id: publication.model_id,
        }
        .encode();
        self.respond(reply_to(msg), MODEL_PUBLICATION_STATUS, parameters)
    }

    fn model_app_bind(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        let request = ModelAppBind::parse(params)?;
        let binding = AppBinding {
            element_address: request.element_address,
            appkey_index: request.appkey_index,
            model_id: request.model_id,
        };
        if !self.bindings.contains(&binding) {
            info!(
                component = "dispatch",
                "Model {} on element 0x{:04x} bound to AppKey 0x{:03x}",
                binding.model_id, binding.element_address, binding.appkey_index
            );
            self.bindings.push(binding);
        }

        let parameters = ModelAppStatus {
            status: StatusCode::Success,
            element_address: request.element_address,
            appkey_index: request.appkey_index,
            model_id: request.model_id,
        }
        .encode();
        self.respond(reply_to(msg), MODEL_APP_STATUS, parameters)
    }

    fn heartbeat_publication_get(
        &mut self,
        msg: &AccessMessage,
        _params: &[u8],
    ) -> Result<(), FoundationError> {
        let parameters = self.heartbeat.status(StatusCode::Success).encode();
        self.respond(reply_to(msg), HEARTBEAT_PUBLICATION_STATUS, parameters)
    }

    fn heartbeat_publication_set(
        &mut self,
        msg: &AccessMessage,
        params: &[u8],
    ) -> Result<(), FoundationError> {
        let request = HeartbeatPublicationSet::parse(params)?;
        self.heartbeat.apply(&request, self.scheduler.as_mut());

        let parameters = self.heartbeat.status(StatusCode::Success).encode();
        let sent = self.respond(reply_to(msg), HEARTBEAT_PUBLICATION_STATUS, parameters);

        self.heartbeat
            .start(self.scheduler.as_mut(), self.config.heartbeat_grace);
        sent
    }

    fn resolve_label(&self, label: &[u8; 16]) -> (StatusCode, u16) {
        match self.collaborators.virtual_addresses.resolve(label) {
            Some(address) => (StatusCode::Success, address),
            None => {
                debug!(component = "dispatch", "Unknown label UUID, reporting invalid address");
                (StatusCode::InvalidAddress, UNASSIGNED_ADDRESS)
            }
        }
    }

    fn record_subscription(&mut self, subscription: Subscription) {
        if !self.subscriptions.contains(&subscription) {
            info!(
                component = "dispatch",
                "Model {} on element 0x{:04x} subscribed to 0x{:04x}",
                subscription.model_id, subscription.element_address, subscription.address
            );
            self.subscriptions.push(subscription);
        }
    }
}

fn reply_to(msg: &AccessMessage) -> ReplyTo {
    ReplyTo {
        src: msg.src,
        netkey_index: msg.netkey_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FailingStore, FakeCrypto, ManualScheduler, RecordingTransport, SAMPLE_AID, SAMPLE_APP_KEY,
    };
    use crate::virtual_address::VirtualAddressTable;
    use mesh_storage::MemoryAppKeyStore;

    const PRIMARY: u16 = 0x0002;
    const PROVISIONER: u16 = 0x0001;
    const LABEL: [u8; 16] = [
        0x00, 0x1B, 0xDC, 0x08, 0x10, 0x21, 0x0B, 0x0E, 0x0A, 0x0C, 0x00, 0x0B, 0x0E, 0x0A, 0x0C,
        0x00,
    ];

    struct Harness {
        server: ConfigurationServer,
        transport: Arc<RecordingTransport>,
        scheduler: ManualScheduler,
        completions: mpsc::UnboundedReceiver<AidDerived>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(FakeCrypto::Aid(SAMPLE_AID), Arc::new(MemoryAppKeyStore::new()))
        }

        fn with(crypto: FakeCrypto, store: Arc<dyn AppKeyStore>) -> Self {
            let transport = Arc::new(RecordingTransport::new());
            let labels = VirtualAddressTable::new();
            labels.register(LABEL, 0x9779);
            let scheduler = ManualScheduler::new();
            let (tx, completions) = mpsc::unbounded_channel();

            let config = ServerConfig {
                primary_element_address: PRIMARY,
                ..ServerConfig::default()
            };
            let collaborators = Collaborators {
                transport: transport.clone(),
                crypto: Arc::new(crypto),
                virtual_addresses: Arc::new(labels),
                store,
            };
            let server = ConfigurationServer::new(
                config,
                collaborators,
                Box::new(scheduler.clone()),
                tx,
            );

            Self {
                server,
                transport,
                scheduler,
                completions,
            }
        }

        fn deliver(&mut self, data: Vec<u8>) -> DispatchOutcome {
            let msg = AccessMessage::new(PROVISIONER, PRIMARY, 0, data);
            self.server.handle_message(&msg)
        }

        async fn complete_derivation(&mut self) {
            let done = self.completions.recv().await.unwrap();
            self.server.on_aid_derived(done);
        }

        /// Parameters of the only response sent so far
        fn single_response(&self, opcode: Opcode) -> Vec<u8> {
            let sent = self.transport.access();
            assert_eq!(sent.len(), 1, "expected exactly one response");
            assert_eq!(sent[0].opcode, opcode);
            sent[0].parameters.to_vec()
        }
    }

    fn appkey_add(netkey_index: u16, appkey_index: u16) -> Vec<u8> {
        let packed = (netkey_index as u32) | ((appkey_index as u32) << 12);
        let mut data = vec![0x00];
        data.extend_from_slice(&packed.to_le_bytes()[..3]);
        let mut key = SAMPLE_APP_KEY;
        key.reverse();
        data.extend_from_slice(&key);
        data
    }

    fn heartbeat_set(destination: u16, count_log: u8, period_log: u8) -> Vec<u8> {
        let mut data = vec![0x80, 0x39];
        data.extend_from_slice(&destination.to_le_bytes());
        data.extend_from_slice(&[count_log, period_log, 0x05, 0x0F, 0x00, 0x00, 0x00]);
        data
    }

    #[test]
    fn test_operation_table_order() {
        let opcodes: Vec<u32> = operations().iter().map(|e| e.opcode.value()).collect();
        assert_eq!(
            opcodes,
            vec![0x00, 0x8008, 0x801B, 0x8020, 0x801A, 0x803D, 0x8038, 0x8039]
        );
        let lengths: Vec<usize> = operations().iter().map(|e| e.min_len).collect();
        assert_eq!(lengths, vec![19, 0, 6, 20, 24, 6, 0, 5]);
    }

    #[test]
    fn test_composition_data_status() {
        let mut h = Harness::new();
        assert_eq!(
            h.deliver(vec![0x80, 0x08]),
            DispatchOutcome::Handled("Composition Data Get")
        );

        let params = h.single_response(COMPOSITION_DATA_STATUS);
        assert_eq!(
            params,
            vec![
                0x00, // page
                0x48, 0x00, // cid
                0x00, 0x00, // pid
                0x00, 0x00, // vid
                0x01, 0x00, // crpl
                0x00, 0x00, // features
                0x03, 0x01, 0x02, 0x00, // element header
                0x00, 0x00, 0x02, 0x00, // models
            ]
        );

        let pdu = &h.transport.access()[0];
        assert_eq!(pdu.src, PRIMARY);
        assert_eq!(pdu.dst, PROVISIONER);
        assert_eq!(pdu.ttl, DEFAULT_RESPONSE_TTL);
        assert_eq!(pdu.security, SecurityContext::DeviceKey);
        assert!(pdu.segmented);
    }

    #[tokio::test]
    async fn test_appkey_add_installs_after_derivation() {
        let mut h = Harness::new();
        assert_eq!(h.deliver(appkey_add(0x456, 0x123)), DispatchOutcome::Handled("AppKey Add"));

        // status waits for the derivation
        assert!(h.transport.access().is_empty());
        assert_eq!(h.server.snapshot().appkeys_outstanding, 1);

        h.complete_derivation().await;
        assert_eq!(
            h.single_response(APPKEY_STATUS),
            vec![0x00, 0x56, 0x34, 0x12]
        );

        let key = h.server.app_key(0x123).unwrap();
        assert_eq!(key.aid, SAMPLE_AID);
        assert_eq!(key.key, SAMPLE_APP_KEY);
        assert_eq!(h.server.snapshot().appkeys_outstanding, 0);
    }

    #[tokio::test]
    async fn test_appkey_add_derivation_failure() {
        let mut h = Harness::with(FakeCrypto::Fail, Arc::new(MemoryAppKeyStore::new()));
        h.deliver(appkey_add(0, 1));
        h.complete_derivation().await;

        assert_eq!(h.single_response(APPKEY_STATUS), vec![0x10, 0x00, 0x10, 0x00]);
        assert!(h.server.app_key(1).is_none());
    }

    #[tokio::test]
    async fn test_appkey_add_storage_failure() {
        let mut h = Harness::with(FakeCrypto::Aid(SAMPLE_AID), Arc::new(FailingStore));
        h.deliver(appkey_add(0, 1));
        h.complete_derivation().await;

        assert_eq!(h.single_response(APPKEY_STATUS), vec![0x09, 0x00, 0x10, 0x00]);
        assert!(h.server.app_key(1).is_none());
    }

    #[tokio::test]
    async fn test_appkey_adds_are_serialised() {
        let mut h = Harness::new();
        h.deliver(appkey_add(0, 1));
        h.deliver(appkey_add(0, 2));
        assert_eq!(h.server.snapshot().appkeys_outstanding, 2);

        h.complete_derivation().await;
        assert_eq!(h.transport.access().len(), 1);
        assert_eq!(h.server.snapshot().appkeys_outstanding, 1);

        h.complete_derivation().await;
        let statuses: Vec<Vec<u8>> = h
            .transport
            .access()
            .iter()
            .map(|pdu| pdu.parameters.to_vec())
            .collect();
        assert_eq!(
            statuses,
            vec![vec![0x00, 0x00, 0x10, 0x00], vec![0x00, 0x00, 0x20, 0x00]]
        );

        let keys = h.server.snapshot().app_keys;
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].appkey_index, 1);
        assert_eq!(keys[1].appkey_index, 2);
    }

    #[tokio::test]
    async fn test_appkey_status_replies_on_request_netkey() {
        let mut h = Harness::new();
        let msg = AccessMessage::new(0x0042, PRIMARY, 0x0003, appkey_add(0x003, 0x001));
        h.server.handle_message(&msg);
        h.complete_derivation().await;

        let pdu = &h.transport.access()[0];
        assert_eq!(pdu.dst, 0x0042);
        assert_eq!(pdu.netkey_index, 0x0003);
    }

    #[test]
    fn test_subscription_add_echoes() {
        let mut h = Harness::new();
        h.deliver(vec![0x80, 0x1B, 0x02, 0x00, 0x01, 0xC0, 0x00, 0x10]);
        assert_eq!(
            h.single_response(MODEL_SUBSCRIPTION_STATUS),
            vec![0x00, 0x02, 0x00, 0x01, 0xC0, 0x00, 0x10]
        );
        assert_eq!(
            h.server.snapshot().subscriptions,
            vec![Subscription {
                element_address: 0x0002,
                address: 0xC001,
                model_id: ModelId::Sig(0x1000),
            }]
        );
    }

    #[test]
    fn test_subscription_add_vendor_model() {
        let mut h = Harness::new();
        h.deliver(vec![0x80, 0x1B, 0x02, 0x00, 0x01, 0xC0, 0x48, 0x00, 0x01, 0x00]);
        assert_eq!(
            h.single_response(MODEL_SUBSCRIPTION_STATUS),
            vec![0x00, 0x02, 0x00, 0x01, 0xC0, 0x48, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_subscription_virtual_address_add() {
        let mut h = Harness::new();
        let mut data = vec![0x80, 0x20, 0x02, 0x00];
        data.extend_from_slice(&LABEL);
        data.extend_from_slice(&[0x00, 0x10]);
        h.deliver(data);

        assert_eq!(
            h.single_response(MODEL_SUBSCRIPTION_STATUS),
            vec![0x00, 0x02, 0x00, 0x79, 0x97, 0x00, 0x10]
        );
    }

    #[test]
    fn test_subscription_unknown_label() {
        let mut h = Harness::new();
        let mut data = vec![0x80, 0x20, 0x02, 0x00];
        data.extend_from_slice(&[0xEE; 16]);
        data.extend_from_slice(&[0x00, 0x10]);
        h.deliver(data);

        assert_eq!(
            h.single_response(MODEL_SUBSCRIPTION_STATUS),
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x10]
        );
        assert!(h.server.snapshot().subscriptions.is_empty());
    }

    fn publication_set(model: &[u8]) -> Vec<u8> {
        let mut data = vec![0x80, 0x1A, 0x02, 0x00];
        data.extend_from_slice(&LABEL);
        data.extend_from_slice(&[0x01, 0x10, 0x05, 0x00, 0x2A]);
        data.extend_from_slice(model);
        data
    }

    #[test]
    fn test_publication_virtual_address_set() {
        let mut h = Harness::new();
        assert_eq!(
            h.deliver(publication_set(&[0x00, 0x10])),
            DispatchOutcome::Handled("Model Publication Virtual Address Set")
        );
        assert_eq!(
            h.single_response(MODEL_PUBLICATION_STATUS),
            vec![0x00, 0x02, 0x00, 0x79, 0x97, 0x01, 0x10, 0x05, 0x00, 0x2A, 0x00, 0x10]
        );

        let publication = &h.server.snapshot().publications[0];
        assert!(publication.credential_flag);
        assert_eq!(publication.retransmit, PublishRetransmit { count: 2, interval_steps: 5 });
    }

    #[test]
    fn test_publication_unknown_label() {
        let mut h = Harness::new();
        let mut data = vec![0x80, 0x1A, 0x02, 0x00];
        data.extend_from_slice(&[0xEE; 16]);
        data.extend_from_slice(&[0x01, 0x10, 0x05, 0x00, 0x2A, 0x00, 0x10]);
        h.deliver(data);

        assert_eq!(
            h.single_response(MODEL_PUBLICATION_STATUS),
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x01, 0x10, 0x05, 0x00, 0x2A, 0x00, 0x10]
        );
        assert!(h.server.snapshot().publications.is_empty());
    }

    #[test]
    fn test_publication_set_vendor_model() {
        let mut h = Harness::new();
        h.deliver(publication_set(&[0x48, 0x00, 0x01, 0x00]));
        assert_eq!(
            h.single_response(MODEL_PUBLICATION_STATUS),
            vec![0x00, 0x02, 0x00, 0x79, 0x97, 0x01, 0x10, 0x05, 0x00, 0x2A, 0x48, 0x00, 0x01, 0x00]
        );

        let snapshot = h.server.snapshot();
        assert_eq!(snapshot.publications.len(), 1);
        assert_eq!(snapshot.publications[0].model_id, ModelId::Vendor(0x0001_0048));
        assert_eq!(snapshot.publications[0].publish_address, 0x9779);
    }

    #[test]
    fn test_publication_set_truncated_is_dropped() {
        let mut h = Harness::new();
        // meets the table minimum but not the fixed fields
        let outcome = h.deliver(publication_set(&[0x00]));
        assert_eq!(outcome, DispatchOutcome::Rejected("Model Publication Virtual Address Set"));
        assert!(h.transport.access().is_empty());
    }

    #[test]
    fn test_model_app_bind_echoes() {
        let mut h = Harness::new();
        h.deliver(vec![0x80, 0x3D, 0x02, 0x00, 0x00, 0x00, 0x00, 0x10]);
        assert_eq!(
            h.single_response(MODEL_APP_STATUS),
            vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x10]
        );

        // a repeated bind is answered but recorded once
        h.deliver(vec![0x80, 0x3D, 0x02, 0x00, 0x00, 0x00, 0x00, 0x10]);
        assert_eq!(h.transport.access().len(), 2);
        assert_eq!(h.server.snapshot().bindings.len(), 1);
    }

    #[test]
    fn test_heartbeat_single_publication() {
        let mut h = Harness::new();
        h.deliver(heartbeat_set(0x0001, 0x01, 0x01));

        assert_eq!(
            h.single_response(HEARTBEAT_PUBLICATION_STATUS),
            vec![0x00, 0x01, 0x00, 0x01, 0x01, 0x05, 0x0F, 0x00, 0x00, 0x00]
        );
        assert_eq!(h.server.heartbeat().state(), HeartbeatState::Active);
        assert_eq!(h.scheduler.armed(), vec![DEFAULT_HEARTBEAT_GRACE]);

        let handle = h.scheduler.expire().unwrap();
        h.server.on_timer(handle);

        let heartbeats = h.transport.control();
        assert_eq!(heartbeats.len(), 1);
        assert_eq!(heartbeats[0].src, PRIMARY);
        assert_eq!(heartbeats[0].dst, 0x0001);
        assert_eq!(heartbeats[0].parameters.as_ref(), &[0x05, 0x00, 0x0F]);

        assert_eq!(h.server.heartbeat().state(), HeartbeatState::Disabled);
        assert_eq!(h.server.heartbeat().count, 0);
        assert!(h.scheduler.armed().is_empty());
    }

    #[test]
    fn test_heartbeat_unassigned_destination_disables() {
        let mut h = Harness::new();
        h.deliver(heartbeat_set(0x0001, 0x04, 0x02));
        assert_eq!(h.server.heartbeat().state(), HeartbeatState::Active);

        h.deliver(heartbeat_set(UNASSIGNED_ADDRESS, 0x04, 0x02));
        assert_eq!(h.server.heartbeat().state(), HeartbeatState::Disabled);
        assert!(h.scheduler.armed().is_empty());
        assert_eq!(h.scheduler.cancelled().len(), 1);

        let statuses = h.transport.access();
        assert_eq!(statuses.len(), 2);
        assert_eq!(
            statuses[1].parameters.as_ref(),
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x0F, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_heartbeat_prohibited_values_dropped() {
        let mut h = Harness::new();
        for data in [heartbeat_set(0x0001, 0x12, 0x01), heartbeat_set(0x0001, 0x01, 0xFF)] {
            assert_eq!(h.deliver(data), DispatchOutcome::Rejected("Heartbeat Publication Set"));
        }
        let mut bad_ttl = heartbeat_set(0x0001, 0x01, 0x01);
        bad_ttl[6] = 0x80;
        h.deliver(bad_ttl);

        assert!(h.transport.access().is_empty());
        assert_eq!(*h.server.heartbeat(), HeartbeatPublication::default());
    }

    #[test]
    fn test_heartbeat_set_between_minimum_and_fields_dropped() {
        let mut h = Harness::new();
        let outcome = h.deliver(vec![0x80, 0x39, 0x01, 0x00, 0x01, 0x01, 0x05]);
        assert_eq!(outcome, DispatchOutcome::Rejected("Heartbeat Publication Set"));
        assert!(h.transport.access().is_empty());
    }

    #[test]
    fn test_heartbeat_get_reports_without_mutating() {
        let mut h = Harness::new();
        h.deliver(heartbeat_set(0x0003, 0x03, 0x02));
        let before = h.server.heartbeat().clone();

        h.deliver(vec![0x80, 0x38]);
        assert_eq!(*h.server.heartbeat(), before);

        let sent = h.transport.access();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].opcode, HEARTBEAT_PUBLICATION_STATUS);
        assert_eq!(sent[1].parameters, sent[0].parameters);
    }

    #[test]
    fn test_transport_refusal_still_applies_state() {
        let mut h = Harness::new();
        h.transport.set_refusing(true);

        let outcome = h.deliver(heartbeat_set(0x0001, 0x02, 0x01));
        assert_eq!(outcome, DispatchOutcome::Rejected("Heartbeat Publication Set"));
        assert_eq!(h.server.heartbeat().state(), HeartbeatState::Active);

        // a refused heartbeat still counts down
        let handle = h.scheduler.expire().unwrap();
        h.server.on_timer(handle);
        assert_eq!(h.server.heartbeat().count, 1);
    }

    #[test]
    fn test_unknown_opcode_no_response() {
        let mut h = Harness::new();
        assert_eq!(
            h.deliver(vec![0x80, 0x3F, 0x00]),
            DispatchOutcome::UnknownOpcode(Opcode::double(0x803F))
        );
        assert!(h.transport.access().is_empty());
    }
}
