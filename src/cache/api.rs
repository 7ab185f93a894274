//! Cache API as seen by cache entries
//!
//! A governing cache implements [`CacheApi`] to keep its global RAM/disk
//! accounting in step with every entry it manages. Entries hold only a weak
//! handle to it: the cache must outlive its entries, and an entry whose cache
//! is gone simply stops reporting.

use super::key::SequenceTime;
use super::storage::StorageMode;

/// Notifications issued by cache entries.
///
/// Calls are made synchronously from whichever thread drives the entry. The
/// registry holds no map-wide lock at that point, only the notifying entry's
/// own lock, so implementations may query the registry but must not lock
/// that same entry.
pub trait CacheApi: Send + Sync {
    /// An entry's buffer was resized
    fn notify_entry_size_changed(&self, old_size: usize, new_size: usize);

    /// An entry committed its storage
    fn notify_entry_allocated(&self, time: SequenceTime, size: usize);

    /// An entry released its storage for good
    fn notify_entry_destroyed(&self, time: SequenceTime, size: usize, storage: StorageMode);

    /// An entry moved between RAM residency and pure-disk residency
    fn notify_entry_storage_changed(
        &self,
        old_storage: StorageMode,
        new_storage: StorageMode,
        time: SequenceTime,
        size: usize,
    );
}
