//! Non-Key Parameters
//!
//! Entry metadata that drives allocation but is not part of the identity hash.

use serde::{Deserialize, Serialize};

/// Where a cost hint sends the storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTarget {
    /// Placeholder entry, nothing is allocated
    Skip,
    /// Heap memory
    Ram,
    /// Memory-mapped file
    Disk,
}

impl AllocationTarget {
    /// `< 0` skips, `0` is RAM, `>= 1` is disk
    #[inline]
    pub fn from_cost(cost: i32) -> Self {
        match cost {
            c if c < 0 => AllocationTarget::Skip,
            0 => AllocationTarget::Ram,
            _ => AllocationTarget::Disk,
        }
    }
}

/// Element count and cost hint of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonKeyParams {
    /// Number of elements of the entry's data type
    pub elements_count: u64,
    /// Storage cost hint
    pub cost: i32,
}

impl NonKeyParams {
    pub fn new(elements_count: u64, cost: i32) -> Self {
        Self {
            elements_count,
            cost,
        }
    }

    /// RAM-resident entry
    pub fn ram(elements_count: u64) -> Self {
        Self::new(elements_count, 0)
    }

    /// Disk-backed entry
    pub fn disk(elements_count: u64) -> Self {
        Self::new(elements_count, 1)
    }

    /// Placeholder entry that never allocates
    pub fn placeholder() -> Self {
        Self::new(0, -1)
    }

    #[inline]
    pub fn elements_count(&self) -> u64 {
        self.elements_count
    }

    #[inline]
    pub fn cost(&self) -> i32 {
        self.cost
    }

    #[inline]
    pub fn target(&self) -> AllocationTarget {
        AllocationTarget::from_cost(self.cost)
    }
}
