//! Item store module
//!
//! Tracks every item observed on the wire:
//! - Placement as a sum over ground / contained / equipped
//! - Parent links derived from the placement record
//! - Recursive subtree removal when a parent disappears
//! - Epoch-marked sweeps for authoritative container batches

use std::collections::HashMap;

use crate::protocol::packets::{ContainerItem, ContainerOpen, Equip, WorldItem7};
use crate::world::serial::Serial;

/// Where an item was last seen
///
/// The parent of an item is derived from this record; ground items have no
/// parent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ItemPlacement {
    /// Observed but not yet placed
    #[default]
    Unplaced,
    /// On the ground
    Ground(WorldItem7),
    /// Inside a container item
    Contained(ContainerItem),
    /// Equipped by a mobile
    Equipped(Equip),
}

impl ItemPlacement {
    /// Serial of the containing entity, when there is one
    pub fn parent_serial(&self) -> Option<Serial> {
        match self {
            ItemPlacement::Unplaced | ItemPlacement::Ground(_) => None,
            ItemPlacement::Contained(p) => Some(p.parent_serial),
            ItemPlacement::Equipped(p) => Some(p.parent_serial),
        }
    }
}

/// One item in the world mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Item serial
    pub serial: Serial,
    /// Last-seen placement
    pub placement: ItemPlacement,
    /// Cached container-open packet, for opened containers
    pub container_open: Option<ContainerOpen>,
    /// Sweep epoch stamped by the last container-content batch
    pub sweep_epoch: u64,
}

impl Item {
    /// Create an item with no placement yet
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            placement: ItemPlacement::Unplaced,
            container_open: None,
            sweep_epoch: 0,
        }
    }

    /// Serial of the containing entity, when there is one
    pub fn parent_serial(&self) -> Option<Serial> {
        self.placement.parent_serial()
    }
}

/// Keyed set of items with parent-link semantics
#[derive(Debug, Default)]
pub struct ItemStore {
    items: HashMap<Serial, Item>,
}

impl ItemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items tracked
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Point lookup
    pub fn find(&self, serial: Serial) -> Option<&Item> {
        self.items.get(&serial)
    }

    /// Mutable point lookup
    pub fn find_mut(&mut self, serial: Serial) -> Option<&mut Item> {
        self.items.get_mut(&serial)
    }

    /// Return the existing item or insert a fresh one with no placement
    ///
    /// Never creates a second record for a seen serial.
    pub fn upsert(&mut self, serial: Serial) -> &mut Item {
        self.items.entry(serial).or_insert_with(|| Item::new(serial))
    }

    /// Remove one item; no cascade
    pub fn remove(&mut self, serial: Serial) -> Option<Item> {
        self.items.remove(&serial)
    }

    /// Remove every item whose derived parent is `parent_serial`, and
    /// recursively their subtrees
    ///
    /// Direct children are gathered before any deletion so that cascading
    /// removals never invalidate the iteration.
    pub fn remove_subtree(&mut self, parent_serial: Serial) {
        let children: Vec<Serial> = self
            .items
            .values()
            .filter(|item| item.parent_serial() == Some(parent_serial))
            .map(|item| item.serial)
            .collect();

        for child in children {
            self.remove_subtree(child);
            self.items.remove(&child);
        }
    }

    /// Remove every child of `parent_serial` whose sweep epoch is not
    /// `epoch`
    ///
    /// Used after a container-content batch: the batch is authoritative for
    /// one container, so a child it did not mention has been removed
    /// server-side.
    pub fn sweep_children_of(&mut self, parent_serial: Serial, epoch: u64) {
        let stale: Vec<Serial> = self
            .items
            .values()
            .filter(|item| {
                item.parent_serial() == Some(parent_serial) && item.sweep_epoch != epoch
            })
            .map(|item| item.serial)
            .collect();

        for serial in stale {
            self.items.remove(&serial);
        }
    }

    /// Iterate over all items
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Iterate over the direct children of `parent_serial`
    pub fn children_of(&self, parent_serial: Serial) -> impl Iterator<Item = &Item> {
        self.items
            .values()
            .filter(move |item| item.parent_serial() == Some(parent_serial))
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
