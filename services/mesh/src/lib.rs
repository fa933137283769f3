//! Bluetooth mesh configuration server node.
//!
//! Glue for embedding the configuration server: configuration loading from the
//! shared YAML file with environment overrides, the service log format, and
//! start-up of storage plus the server runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod logging;
pub mod node;

// Re-export main types
pub use config::{NodeConfig, StorageConfig, StorageKind};
pub use logging::{init_logging, MeshLogFormatter};
pub use node::{Node, NodeHandle, NodeServices};
