//! Entry Registry
//!
//! Thread-safe front over [`CacheEntry`] values keyed by their hash.
//!
//! # Data flow
//!
//! ```text
//! key ──hash──▶ get_or_create ──miss──▶ register (locked) ──allocate / restore──▶ unlock
//!                    │
//!                    └──hit──▶ handle (mapping re-opened if evicted to disk)
//!
//! evict_to_disk: disk entry unmapped (file kept), RAM entry destroyed
//! remove:        entry unmapped, file deleted, entry dropped
//! ```
//!
//! Each entry sits behind its own `RwLock`: writers (allocate, reallocate,
//! reopen, evict) are exclusive, readers of the buffer are shared.

use std::mem::size_of;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::api::CacheApi;
use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::key::{HashKey, KeyParams};
use super::layout;
use super::params::NonKeyParams;
use super::storage::StorageMode;
use crate::error::Result;

/// Shared handle to a registered entry
pub type EntryHandle<T, P> = Arc<RwLock<CacheEntry<T, P>>>;

/// Registry of live cache entries
pub struct EntryRegistry<T: Pod, P: KeyParams> {
    config: CacheConfig,
    manager: Arc<dyn CacheApi>,
    entries: DashMap<u64, EntryHandle<T, P>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Pod, P: KeyParams> std::fmt::Debug for EntryRegistry<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRegistry")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl<T: Pod, P: KeyParams> EntryRegistry<T, P> {
    /// Create a registry whose entries report to `manager`
    pub fn new(config: CacheConfig, manager: Arc<dyn CacheApi>) -> Result<Self> {
        config.validate()?;
        info!(
            cache_dir = %config.cache_dir.display(),
            restore_existing = config.restore_existing,
            "entry registry created"
        );
        Ok(Self {
            config,
            manager,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Look up the entry for `key`, creating and allocating it on a miss.
    ///
    /// Returns the handle and whether it was created by this call. A failed
    /// allocation publishes nothing.
    ///
    /// A new entry is registered unallocated with its write lock held, and is
    /// allocated after the map guard is released. Concurrent callers for the
    /// same key wait on the entry lock; `contains` already sees it.
    pub fn get_or_create(
        &self,
        key: HashKey<P>,
        params: Arc<NonKeyParams>,
    ) -> Result<(EntryHandle<T, P>, bool)> {
        let hash = key.hash();
        let weak = Arc::downgrade(&self.manager);
        let entry = CacheEntry::new(key, params, Some(weak));

        loop {
            let existing = match self.entries.entry(hash) {
                Entry::Occupied(occupied) => occupied.get().clone(),
                Entry::Vacant(vacant) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let handle = Arc::new(RwLock::new(entry));
                    let mut pending = handle.write();
                    drop(vacant.insert(handle.clone()));

                    if let Err(e) = self.allocate_entry(&mut pending, hash) {
                        self.unregister(hash, &handle);
                        return Err(e);
                    }
                    drop(pending);
                    return Ok((handle, true));
                }
            };

            // Waits for an in-flight creation of the same key to finish
            drop(existing.read());
            if !self.is_registered(hash, &existing) {
                // Its creation failed; try again, possibly as the creator
                continue;
            }
            Self::ensure_resident(&existing)?;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((existing, false));
        }
    }

    /// Allocate a freshly registered entry, restoring its file if allowed.
    ///
    /// A restored file is only adopted when its length matches the
    /// parameters; an element count of 0 accepts any non-empty file.
    fn allocate_entry(&self, entry: &mut CacheEntry<T, P>, hash: u64) -> Result<()> {
        let base = self.config.cache_dir.as_path();

        if self.config.restore_existing && Self::has_cache_file(base, hash) {
            match entry.allocate_memory(true, base) {
                Ok(()) if Self::restored_size_matches(entry) => {
                    debug!(hash = %format_args!("{:016x}", hash), size = entry.size(), "restored entry from disk");
                    return Ok(());
                }
                Ok(()) => {
                    warn!(
                        hash = %format_args!("{:016x}", hash),
                        size = entry.size(),
                        elements = entry.params().elements_count(),
                        "discarding cache file of unexpected size"
                    );
                    entry.deallocate();
                    entry.remove_any_backing_file()?;
                }
                Err(e) => {
                    warn!(hash = %format_args!("{:016x}", hash), error = %e, "restore failed, allocating fresh");
                }
            }
        }

        entry.allocate_memory(false, base)
    }

    fn restored_size_matches(entry: &CacheEntry<T, P>) -> bool {
        match entry.params().elements_count() {
            0 => entry.size() > 0,
            count => count
                .checked_mul(size_of::<T>() as u64)
                .is_some_and(|expected| expected == entry.size() as u64),
        }
    }

    fn has_cache_file(base: &Path, hash: u64) -> bool {
        layout::path_for_hash(base, hash).is_ok_and(|path| path.is_file())
    }

    /// Whether `handle` is still the registered entry for `hash`
    fn is_registered(&self, hash: u64, handle: &EntryHandle<T, P>) -> bool {
        self.entries
            .get(&hash)
            .is_some_and(|registered| Arc::ptr_eq(registered.value(), handle))
    }

    fn unregister(&self, hash: u64, handle: &EntryHandle<T, P>) {
        self.entries
            .remove_if(&hash, |_, registered| Arc::ptr_eq(registered, handle));
    }

    /// Re-open the mapping of an entry that was evicted to disk
    fn ensure_resident(handle: &EntryHandle<T, P>) -> Result<()> {
        if handle.read().is_resident() {
            return Ok(());
        }
        let mut entry = handle.write();
        if !entry.is_resident() && entry.is_stored_on_disk() {
            entry.reopen_file_mapping()?;
        }
        Ok(())
    }

    /// Look up an entry by hash, re-opening its mapping if needed
    pub fn get(&self, hash: u64) -> Result<Option<EntryHandle<T, P>>> {
        let Some(handle) = self.entries.get(&hash).map(|h| h.value().clone()) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        drop(handle.read());
        if !self.is_registered(hash, &handle) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        Self::ensure_resident(&handle)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(handle))
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.entries.contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release the resident storage of an entry.
    ///
    /// A disk entry keeps its file and stays registered; a RAM entry has
    /// nowhere to go and is removed. Returns the storage the entry had, or
    /// `None` if the hash is unknown.
    pub fn evict_to_disk(&self, hash: u64) -> Option<StorageMode> {
        let handle = self.entries.get(&hash).map(|h| h.value().clone())?;

        let mut entry = handle.write();
        if entry.is_stored_on_disk() {
            entry.deallocate();
            debug!(hash = %format_args!("{:016x}", hash), "evicted entry to disk");
            return Some(StorageMode::Disk);
        }
        drop(entry);

        self.entries.remove(&hash);
        handle.write().deallocate();
        debug!(hash = %format_args!("{:016x}", hash), "destroyed RAM entry on eviction");
        Some(StorageMode::Ram)
    }

    /// Drop an entry for good, deleting its backing file.
    ///
    /// Returns `false` if the hash is unknown.
    pub fn remove(&self, hash: u64) -> Result<bool> {
        let Some((_, handle)) = self.entries.remove(&hash) else {
            return Ok(false);
        };
        let mut entry = handle.write();
        entry.deallocate();
        entry.remove_any_backing_file()?;
        Ok(true)
    }

    /// Remove every entry, deleting backing files.
    ///
    /// All entries are attempted; the first error is returned.
    pub fn clear(&self) -> Result<usize> {
        let hashes: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        let mut removed = 0;
        let mut first_error = None;

        for hash in hashes {
            match self.remove(hash) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(hash = %format_args!("{:016x}", hash), error = %e, "failed to remove entry");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<dyn CacheApi> {
        &self.manager
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            entries: self.len(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Number of registered entries
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
