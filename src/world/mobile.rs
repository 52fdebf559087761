//! Mobile store module
//!
//! Tracks every mobile observed on the wire, each caching the last full
//! state packet and the richest status packet seen for it. Equipped items
//! are not stored here; they live in the item store keyed by the mobile's
//! serial as parent.

use std::collections::HashMap;

use crate::protocol::packets::{MobileIncoming, MobileStatus};
use crate::world::serial::Serial;

/// One mobile in the world mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mobile {
    /// Mobile serial
    pub serial: Serial,
    /// Last full state packet seen for this mobile
    pub incoming: Option<MobileIncoming>,
    /// Richest status packet seen for this mobile
    pub status: Option<MobileStatus>,
}

impl Mobile {
    /// Create a mobile with no cached packets
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            incoming: None,
            status: None,
        }
    }
}

/// Keyed set of mobiles
#[derive(Debug, Default)]
pub struct MobileStore {
    mobiles: HashMap<Serial, Mobile>,
}

impl MobileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mobiles tracked
    pub fn len(&self) -> usize {
        self.mobiles.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.mobiles.is_empty()
    }

    /// Point lookup
    pub fn find(&self, serial: Serial) -> Option<&Mobile> {
        self.mobiles.get(&serial)
    }

    /// Mutable point lookup
    pub fn find_mut(&mut self, serial: Serial) -> Option<&mut Mobile> {
        self.mobiles.get_mut(&serial)
    }

    /// Return the existing mobile or insert a fresh one
    ///
    /// At most one mobile exists per serial.
    pub fn upsert(&mut self, serial: Serial) -> &mut Mobile {
        self.mobiles
            .entry(serial)
            .or_insert_with(|| Mobile::new(serial))
    }

    /// Remove one mobile
    pub fn remove(&mut self, serial: Serial) -> Option<Mobile> {
        self.mobiles.remove(&serial)
    }

    /// Iterate over all mobiles
    pub fn iter(&self) -> impl Iterator<Item = &Mobile> {
        self.mobiles.values()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.mobiles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = MobileStore::new();
        store.upsert(1).incoming = Some(MobileIncoming {
            serial: 1,
            body: 0x190,
            x: 10,
            y: 20,
            z: 0,
            direction: 0,
            hue: 0,
            flags: 0,
            notoriety: 1,
            items: Vec::new(),
        });

        let mobile = store.upsert(1);
        assert!(mobile.incoming.is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut store = MobileStore::new();
        store.upsert(1);
        store.upsert(2);

        assert!(store.remove(1).is_some());
        assert!(store.remove(1).is_none());
        assert!(store.find(2).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut store = MobileStore::new();
        store.upsert(1);
        store.upsert(2);
        store.clear();
        assert!(store.is_empty());
    }
}
