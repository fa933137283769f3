//! Configuration Server model for the mesh node.
//!
//! This crate implements the foundation Configuration Server: it dispatches
//! inbound access messages through a first-match operation table, answers
//! with bit-exact status messages, provisions application keys through an
//! asynchronous AID derivation, and runs the Heartbeat Publication timer.
//!
//! ## Components
//!
//! - **Operation table**: ordered (opcode, minimum length, handler) entries
//! - **Configuration server**: handlers and node configuration state
//! - **Heartbeat publication**: self re-arming timer driven by a [`Scheduler`]
//! - **AppKey provisioning**: pending derivation slot with a FIFO queue
//! - **Runtime**: single task serialising messages, timers and completions
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_foundation::{ChannelTransport, Collaborators, Runtime, ServerConfig, VirtualAddressTable};
//! use mesh_foundation::KeyDerivation;
//! use mesh_storage::MemoryAppKeyStore;
//! use mesh_wire::AccessMessage;
//! use std::sync::Arc;
//!
//! # async fn example(crypto: Arc<dyn KeyDerivation>) -> anyhow::Result<()> {
//! let (transport, mut outbound) = ChannelTransport::new();
//! let collaborators = Collaborators {
//!     transport: Arc::new(transport),
//!     crypto,
//!     virtual_addresses: Arc::new(VirtualAddressTable::new()),
//!     store: Arc::new(MemoryAppKeyStore::new()),
//! };
//!
//! let (runtime, handle) = Runtime::new(ServerConfig::default(), collaborators, 64);
//! tokio::spawn(runtime.run());
//!
//! // Composition Data Get from the provisioner
//! handle.deliver(AccessMessage::new(0x0001, 0x0002, 0, vec![0x80, 0x08])).await?;
//! while let Some(pdu) = outbound.recv().await {
//!     println!("outbound: {:?}", pdu);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod appkey;
pub mod crypto;
pub mod error;
pub mod heartbeat;
pub mod operation;
pub mod runtime;
pub mod server;
pub mod timer;
pub mod transport;
pub mod virtual_address;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use appkey::{AidDerived, AppKeyFailure, AppKeyProvisioning};
pub use crypto::{CryptoError, KeyDerivation};
pub use error::FoundationError;
pub use heartbeat::{HeartbeatPublication, HeartbeatState};
pub use operation::{dispatch, DispatchOutcome, OperationEntry};
pub use runtime::{Runtime, RuntimeHandle};
pub use server::{
    operations, Collaborators, ConfigurationServer, ServerConfig, ServerSnapshot,
    DEFAULT_HEARTBEAT_GRACE, DEFAULT_RESPONSE_TTL,
};
pub use timer::{Scheduler, TimerHandle, TokioScheduler};
pub use transport::{
    AccessPdu, AccessTransport, ChannelTransport, ControlPdu, OutboundPdu, SecurityContext,
    TransportError,
};
pub use virtual_address::{VirtualAddressResolver, VirtualAddressTable};
