//! Virtual address lookup.

use dashmap::DashMap;
use tracing::debug;

/// Resolves label UUIDs to 16-bit virtual addresses
pub trait VirtualAddressResolver: Send + Sync {
    /// Look up the virtual address registered for `label`
    fn resolve(&self, label: &[u8; 16]) -> Option<u16>;
}

/// In-memory label registry
#[derive(Debug, Default)]
pub struct VirtualAddressTable {
    entries: DashMap<[u8; 16], u16>,
}

impl VirtualAddressTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `label` under `address`, replacing any previous entry
    pub fn register(&self, label: [u8; 16], address: u16) {
        debug!(component = "dispatch", "Registered virtual address 0x{:04x}", address);
        self.entries.insert(label, address);
    }

    /// Number of registered labels
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no labels are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VirtualAddressResolver for VirtualAddressTable {
    fn resolve(&self, label: &[u8; 16]) -> Option<u16> {
        self.entries.get(label).map(|entry| *entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABEL: [u8; 16] = [
        0x00, 0x1B, 0xDC, 0x08, 0x10, 0x21, 0x0B, 0x0E, 0x0A, 0x0C, 0x00, 0x0B, 0x0E, 0x0A, 0x0C,
        0x00,
    ];

    #[test]
    fn test_register_and_resolve() {
        let table = VirtualAddressTable::new();
        assert!(table.is_empty());
        assert_eq!(table.resolve(&LABEL), None);

        table.register(LABEL, 0x9779);
        assert_eq!(table.resolve(&LABEL), Some(0x9779));
        assert_eq!(table.len(), 1);

        table.register(LABEL, 0x8001);
        assert_eq!(table.resolve(&LABEL), Some(0x8001));
        assert_eq!(table.len(), 1);
    }
}
