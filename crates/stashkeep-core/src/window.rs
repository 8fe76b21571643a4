//! Slot accounting for an open container window.
//!
//! A window is a flat slot array whose tail mirrors the operator's own
//! inventory. Slots `[0, container_end)` belong to the container and
//! `[container_end, total)` to the inventory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// An occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotItem {
    /// Item identity, e.g. `iron_ingot`.
    pub name: String,
    pub count: u32,
}

impl SlotItem {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Which part of the window a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Container,
    Inventory,
}

/// Snapshot of an open container window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerWindow {
    pub slots: Vec<Option<SlotItem>>,
    /// Length of the inventory tail at the end of `slots`.
    pub inventory_len: usize,
}

impl ContainerWindow {
    pub fn new(slots: Vec<Option<SlotItem>>, inventory_len: usize) -> Self {
        Self {
            slots,
            inventory_len,
        }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// First slot index past the container region.
    pub fn container_end(&self) -> usize {
        self.total().saturating_sub(self.inventory_len)
    }

    pub fn range(&self, region: Region) -> Range<usize> {
        match region {
            Region::Container => 0..self.container_end(),
            Region::Inventory => self.container_end()..self.total(),
        }
    }

    pub fn region(&self, region: Region) -> &[Option<SlotItem>] {
        &self.slots[self.range(region)]
    }

    /// Total count per item name in a region.
    pub fn summarize(&self, region: Region) -> BTreeMap<String, u32> {
        let mut totals = BTreeMap::new();
        for item in self.region(region).iter().flatten() {
            *totals.entry(item.name.clone()).or_insert(0) += item.count;
        }
        totals
    }

    pub fn free_slots(&self, region: Region) -> usize {
        self.region(region).iter().filter(|s| s.is_none()).count()
    }

    pub fn count_of(&self, region: Region, item: &str) -> u32 {
        self.region(region)
            .iter()
            .flatten()
            .filter(|s| s.name == item)
            .map(|s| s.count)
            .sum()
    }
}

/// Direction of an item move relative to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Inventory to container.
    Deposit,
    /// Container to inventory.
    Withdraw,
}

impl TransferDirection {
    pub fn source(&self) -> Region {
        match self {
            TransferDirection::Deposit => Region::Inventory,
            TransferDirection::Withdraw => Region::Container,
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Deposit => f.write_str("deposit"),
            TransferDirection::Withdraw => f.write_str("withdraw"),
        }
    }
}

/// Result of a bulk move.
///
/// A move that cannot finish (container full, source short) is reported here
/// rather than as an error: `moved + remaining() == requested` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub item: String,
    pub direction: TransferDirection,
    pub requested: u32,
    pub moved: u32,
}

impl TransferOutcome {
    pub fn remaining(&self) -> u32 {
        self.requested - self.moved
    }

    pub fn is_complete(&self) -> bool {
        self.moved == self.requested
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            write!(f, "{} {} x{}", self.direction, self.item, self.moved)
        } else {
            write!(
                f,
                "{} {}: moved {} of {}, {} remaining",
                self.direction,
                self.item,
                self.moved,
                self.requested,
                self.remaining()
            )
        }
    }
}
