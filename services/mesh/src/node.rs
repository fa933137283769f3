//! Node start-up.
//!
//! [`Node::start`] opens storage, builds the configuration server runtime,
//! restores persisted application keys and spawns the event loop.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use mesh_foundation::{
    AccessTransport, Collaborators, DispatchOutcome, KeyDerivation, Runtime, RuntimeHandle,
    ServerSnapshot, VirtualAddressResolver,
};
use mesh_storage::Storage;
use mesh_wire::AccessMessage;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Services supplied by the embedding application
#[derive(Clone)]
pub struct NodeServices {
    /// Outbound transport
    pub transport: Arc<dyn AccessTransport>,
    /// AID derivation
    pub crypto: Arc<dyn KeyDerivation>,
    /// Label UUID registry
    pub virtual_addresses: Arc<dyn VirtualAddressResolver>,
}

/// Entry point for starting a node
pub struct Node;

impl Node {
    /// Start the configuration server described by `config`
    pub async fn start(config: &NodeConfig, services: NodeServices) -> Result<NodeHandle> {
        config.validate()?;

        let storage = Storage::from_mode(config.storage_mode())
            .await
            .context("failed to open application key storage")?;

        let collaborators = Collaborators {
            transport: services.transport,
            crypto: services.crypto,
            virtual_addresses: services.virtual_addresses,
            store: storage.app_keys.clone(),
        };

        let (mut runtime, handle) =
            Runtime::new(config.server_config(), collaborators, config.command_capacity);
        let restored = runtime
            .restore()
            .await
            .context("failed to restore application keys")?;

        let task = tokio::spawn(runtime.run());
        info!(
            "Mesh node started: element=0x{:04x}, {} application keys restored",
            config.primary_element_address, restored
        );

        Ok(NodeHandle {
            runtime: handle,
            task,
        })
    }
}

/// Handle to a running node
pub struct NodeHandle {
    runtime: RuntimeHandle,
    task: JoinHandle<()>,
}

impl NodeHandle {
    /// Cloneable handle to the server runtime
    pub fn runtime(&self) -> RuntimeHandle {
        self.runtime.clone()
    }

    /// Deliver an inbound access message
    pub async fn deliver(&self, msg: AccessMessage) -> Result<()> {
        Ok(self.runtime.deliver(msg).await?)
    }

    /// Deliver an inbound access message and wait for the dispatch outcome
    pub async fn dispatch(&self, msg: AccessMessage) -> Result<DispatchOutcome> {
        Ok(self.runtime.dispatch(msg).await?)
    }

    /// Read the current server state
    pub async fn snapshot(&self) -> Result<ServerSnapshot> {
        Ok(self.runtime.snapshot().await?)
    }

    /// Stop the event loop and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        self.runtime.shutdown().await?;
        self.task.await.context("runtime task failed")?;
        info!("Mesh node stopped");
        Ok(())
    }
}
