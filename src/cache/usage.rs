//! Cache Usage Accounting
//!
//! Lock-free [`CacheApi`] implementation that keeps the RAM and disk footprint
//! of every entry reporting to it.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::api::CacheApi;
use super::key::SequenceTime;
use super::storage::StorageMode;

/// Memory and disk accounting fed by entry notifications
#[derive(Debug, Default)]
pub struct UsageTracker {
    // Footprint
    ram_bytes: AtomicU64,
    disk_bytes: AtomicU64,
    ram_entries: AtomicU64,
    disk_entries: AtomicU64,

    // Event counters
    allocations: AtomicU64,
    destructions: AtomicU64,
    evictions_to_disk: AtomicU64,
    reloads_from_disk: AtomicU64,
    resizes: AtomicU64,
}

/// Saturating subtraction on an atomic counter
fn saturating_sub(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn footprint(&self, storage: StorageMode) -> (&AtomicU64, &AtomicU64) {
        match storage {
            StorageMode::Ram => (&self.ram_bytes, &self.ram_entries),
            StorageMode::Disk => (&self.disk_bytes, &self.disk_entries),
        }
    }

    fn add(&self, storage: StorageMode, size: usize) {
        let (bytes, entries) = self.footprint(storage);
        bytes.fetch_add(size as u64, Ordering::Relaxed);
        entries.fetch_add(1, Ordering::Relaxed);
    }

    fn sub(&self, storage: StorageMode, size: usize) {
        let (bytes, entries) = self.footprint(storage);
        saturating_sub(bytes, size as u64);
        saturating_sub(entries, 1);
    }

    pub fn ram_bytes(&self) -> u64 {
        self.ram_bytes.load(Ordering::Relaxed)
    }

    pub fn disk_bytes(&self) -> u64 {
        self.disk_bytes.load(Ordering::Relaxed)
    }

    pub fn ram_entries(&self) -> u64 {
        self.ram_entries.load(Ordering::Relaxed)
    }

    pub fn disk_entries(&self) -> u64 {
        self.disk_entries.load(Ordering::Relaxed)
    }

    /// RAM plus disk bytes
    pub fn total_bytes(&self) -> u64 {
        self.ram_bytes() + self.disk_bytes()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            ram_bytes: self.ram_bytes(),
            disk_bytes: self.disk_bytes(),
            ram_entries: self.ram_entries(),
            disk_entries: self.disk_entries(),
            allocations: self.allocations.load(Ordering::Relaxed),
            destructions: self.destructions.load(Ordering::Relaxed),
            evictions_to_disk: self.evictions_to_disk.load(Ordering::Relaxed),
            reloads_from_disk: self.reloads_from_disk.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            taken_at: Utc::now(),
        }
    }
}

impl CacheApi for UsageTracker {
    fn notify_entry_size_changed(&self, old_size: usize, new_size: usize) {
        trace!(old_size, new_size, "entry size changed");
        self.resizes.fetch_add(1, Ordering::Relaxed);
        if new_size >= old_size {
            self.ram_bytes
                .fetch_add((new_size - old_size) as u64, Ordering::Relaxed);
        } else {
            saturating_sub(&self.ram_bytes, (old_size - new_size) as u64);
        }
    }

    fn notify_entry_allocated(&self, time: SequenceTime, size: usize) {
        trace!(time, size, "entry allocated");
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.add(StorageMode::Ram, size);
    }

    fn notify_entry_destroyed(&self, time: SequenceTime, size: usize, storage: StorageMode) {
        trace!(time, size, %storage, "entry destroyed");
        self.destructions.fetch_add(1, Ordering::Relaxed);
        self.sub(storage, size);
    }

    fn notify_entry_storage_changed(
        &self,
        old_storage: StorageMode,
        new_storage: StorageMode,
        time: SequenceTime,
        size: usize,
    ) {
        trace!(time, size, from = %old_storage, to = %new_storage, "entry storage changed");
        if old_storage == new_storage {
            return;
        }
        match new_storage {
            StorageMode::Disk => self.evictions_to_disk.fetch_add(1, Ordering::Relaxed),
            StorageMode::Ram => self.reloads_from_disk.fetch_add(1, Ordering::Relaxed),
        };
        self.sub(old_storage, size);
        self.add(new_storage, size);
    }
}

/// Serializable usage figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub ram_bytes: u64,
    pub disk_bytes: u64,
    pub ram_entries: u64,
    pub disk_entries: u64,
    pub allocations: u64,
    pub destructions: u64,
    pub evictions_to_disk: u64,
    pub reloads_from_disk: u64,
    pub resizes: u64,
    pub taken_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
