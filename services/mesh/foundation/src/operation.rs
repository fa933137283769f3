//! Operation table and first-match dispatcher.
//!
//! A model exposes an ordered table of [`OperationEntry`] values. Dispatch
//! decodes the opcode of an inbound message and invokes the first entry whose
//! opcode matches and whose minimum parameter length is satisfied. At most one
//! handler runs per message; everything else is dropped without a response.

use crate::error::FoundationError;
use mesh_wire::{AccessMessage, Opcode, WireError};
use tracing::{debug, warn};

/// Handler invoked with the model, the message and its parameters
pub type Handler<M> = fn(&mut M, &AccessMessage, &[u8]) -> Result<(), FoundationError>;

/// One row of an operation table
pub struct OperationEntry<M> {
    /// Opcode handled by this entry
    pub opcode: Opcode,
    /// Minimum parameter length, excluding the opcode
    pub min_len: usize,
    /// Operation name for logs
    pub name: &'static str,
    /// Handler to invoke
    pub handler: Handler<M>,
}

/// What dispatch did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The named handler ran to completion
    Handled(&'static str),
    /// The named handler ran but dropped the message or failed to respond
    Rejected(&'static str),
    /// No entry has this opcode
    UnknownOpcode(Opcode),
    /// An entry matched the opcode but the message was too short for it
    TooShort {
        /// Decoded opcode
        opcode: Opcode,
        /// Parameter octets present
        len: usize,
    },
    /// The opcode prefix could not be decoded
    Malformed(WireError),
}

impl DispatchOutcome {
    /// Whether a handler was invoked
    pub fn invoked(&self) -> bool {
        matches!(self, DispatchOutcome::Handled(_) | DispatchOutcome::Rejected(_))
    }
}

/// Dispatch `msg` against `table`
pub fn dispatch<M>(
    table: &[OperationEntry<M>],
    model: &mut M,
    msg: &AccessMessage,
) -> DispatchOutcome {
    let opcode = match msg.opcode() {
        Ok(opcode) => opcode,
        Err(e) => {
            debug!(component = "dispatch", "Dropping message from 0x{:04x}: {}", msg.src, e);
            return DispatchOutcome::Malformed(e);
        }
    };

    let mut opcode_known = false;
    for entry in table {
        if entry.opcode != opcode {
            continue;
        }
        opcode_known = true;
        if opcode.width() + entry.min_len > msg.len() {
            continue;
        }

        debug!(
            component = "dispatch",
            "{} from 0x{:04x} ({} octets)",
            entry.name,
            msg.src,
            msg.len()
        );
        let params = msg.parameters(opcode);
        return match (entry.handler)(model, msg, params) {
            Ok(()) => DispatchOutcome::Handled(entry.name),
            Err(e) if e.is_drop() => {
                debug!(component = "dispatch", "{} dropped: {}", entry.name, e);
                DispatchOutcome::Rejected(entry.name)
            }
            Err(e) => {
                warn!(component = "dispatch", "{} failed: {}", entry.name, e);
                DispatchOutcome::Rejected(entry.name)
            }
        };
    }

    let params = msg.len() - opcode.width();
    if opcode_known {
        debug!(
            component = "dispatch",
            "Dropping {}: {} parameter octets too short",
            opcode,
            params
        );
        DispatchOutcome::TooShort { opcode, len: params }
    } else {
        debug!(component = "dispatch", "Dropping unknown opcode {}", opcode);
        DispatchOutcome::UnknownOpcode(opcode)
    }
}
