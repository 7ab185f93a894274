//! Cache Entry
//!
//! Couples a [`HashKey`], its [`NonKeyParams`] and a [`StorageBuffer`], and
//! reports every storage transition to the governing [`CacheApi`].
//!
//! # Storage lifecycle
//!
//! ```text
//! Unallocated --allocate(RAM)--> ResidentRAM --deallocate--> Unallocated
//! Unallocated --allocate(Disk)--> ResidentDisk(mapped) --deallocate--> ResidentDisk(unmapped)
//! ResidentDisk(unmapped) --reopen_file_mapping--> ResidentDisk(mapped)
//! ResidentDisk(unmapped) --remove_any_backing_file--> Destroyed
//! ResidentRAM --reallocate--> ResidentRAM (new size)
//! ResidentDisk(mapped) --reallocate--> ResidentDisk(mapped, new size)
//! ```
//!
//! An entry is not internally synchronised: allocation, reallocation and
//! re-opening must be serialised by the owning cache.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use tracing::{debug, error};

use super::api::CacheApi;
use super::key::{HashKey, KeyParams, SequenceTime};
use super::layout;
use super::params::{AllocationTarget, NonKeyParams};
use super::storage::{StorageBuffer, StorageMode};
use crate::error::{Error, Result};

/// Key, parameters and buffer of one cached element
pub struct CacheEntry<T: Pod, P: KeyParams> {
    key: HashKey<P>,
    params: Arc<NonKeyParams>,
    data: StorageBuffer<T>,
    /// Non-owning handle to the governing cache
    cache: Option<Weak<dyn CacheApi>>,
    /// Storage has been reported to the cache and not yet released
    resident: bool,
}

impl<T: Pod, P: KeyParams> CacheEntry<T, P> {
    /// Create an entry without storage; call [`allocate_memory`](Self::allocate_memory) next.
    ///
    /// `cache` is `None` for entries living outside any cache.
    pub fn new(
        key: HashKey<P>,
        params: Arc<NonKeyParams>,
        cache: Option<Weak<dyn CacheApi>>,
    ) -> Self {
        Self {
            key,
            params,
            data: StorageBuffer::new(),
            cache,
            resident: false,
        }
    }

    /// Entry reporting to `cache`
    pub fn with_cache<C: CacheApi + 'static>(
        key: HashKey<P>,
        params: Arc<NonKeyParams>,
        cache: &Arc<C>,
    ) -> Self {
        let weak: Weak<dyn CacheApi> = Arc::downgrade(cache) as Weak<dyn CacheApi>;
        Self::new(key, params, Some(weak))
    }

    /// Entry that reports to nobody
    pub fn detached(key: HashKey<P>, params: Arc<NonKeyParams>) -> Self {
        Self::new(key, params, None)
    }

    fn manager(&self) -> Option<Arc<dyn CacheApi>> {
        self.cache.as_ref()?.upgrade()
    }

    /// Commit the entry's storage and report it to the cache.
    ///
    /// With `restore` the buffer adopts the existing file at the hash-derived
    /// location under `path`; otherwise it is sized from the parameters and
    /// placed according to the cost hint (disk files also go under `path`).
    /// On failure nothing is reported and the entry stays unallocated.
    pub fn allocate_memory(&mut self, restore: bool, path: &Path) -> Result<()> {
        if self.resident || self.data.is_committed() {
            debug!(hash = %format_args!("{:016x}", self.hash_key()), "entry already allocated");
            return Ok(());
        }

        if restore {
            self.restore_buffer_from_file(path)?;
        } else {
            self.allocate(path)?;
        }

        self.resident = true;
        if let Some(cache) = self.manager() {
            cache.notify_entry_allocated(self.time(), self.size());
        }
        Ok(())
    }

    fn allocate(&mut self, path: &Path) -> Result<()> {
        let file_name = if self.params.target() == AllocationTarget::Disk {
            self.cache_file_path_or_empty(path)
        } else {
            PathBuf::new()
        };
        self.data
            .allocate(self.params.elements_count(), self.params.cost(), &file_name)
    }

    fn restore_buffer_from_file(&mut self, path: &Path) -> Result<()> {
        let file_name = self.cache_file_path_or_empty(path);
        self.data.restore_buffer_from_file(&file_name)
    }

    /// An unusable base path is reported here; the empty file name then fails
    /// to map downstream.
    fn cache_file_path_or_empty(&self, path: &Path) -> PathBuf {
        self.cache_file_path(path).unwrap_or_else(|e| {
            error!(error = %e, "path is empty but required for disk caching");
            PathBuf::new()
        })
    }

    /// Hash-derived location of this entry's file under `base`
    pub fn cache_file_path(&self, base: &Path) -> Result<PathBuf> {
        layout::path_for_hash(base, self.hash_key())
    }

    /// Bring an entry that lives only on disk back into residency.
    ///
    /// The caller must guarantee exclusive access to the entry.
    pub fn reopen_file_mapping(&mut self) -> Result<()> {
        self.data.reopen_file_mapping()?;
        self.resident = true;
        if let Some(cache) = self.manager() {
            cache.notify_entry_storage_changed(
                StorageMode::Disk,
                StorageMode::Ram,
                self.time(),
                self.size(),
            );
        }
        Ok(())
    }

    /// Release resident storage. Idempotent.
    ///
    /// A disk entry keeps its file and is reported as moving to disk; a RAM
    /// entry is reported destroyed. The report precedes the release.
    pub fn deallocate(&mut self) {
        if self.resident {
            self.resident = false;
            if let Some(cache) = self.manager() {
                if self.is_stored_on_disk() {
                    cache.notify_entry_storage_changed(
                        StorageMode::Ram,
                        StorageMode::Disk,
                        self.time(),
                        self.size(),
                    );
                } else {
                    cache.notify_entry_destroyed(self.time(), self.size(), StorageMode::Ram);
                }
            }
        }
        self.data.deallocate();
    }

    /// Delete the backing file of a deallocated disk entry, destroying it for good
    pub fn remove_any_backing_file(&mut self) -> Result<()> {
        if self.data.is_allocated() && !self.is_stored_on_disk() {
            return Err(Error::InvalidState(
                "RAM storage must be deallocated first".to_string(),
            ));
        }

        let size = self.size();
        let on_disk = self.is_stored_on_disk();
        self.data.remove_any_backing_file()?;

        if on_disk {
            if let Some(cache) = self.manager() {
                cache.notify_entry_destroyed(self.time(), size, StorageMode::Disk);
            }
        }
        Ok(())
    }

    /// Resize the buffer to `count` elements and report the size delta.
    ///
    /// Used by entries filled progressively whose final size is not known
    /// at allocation time.
    pub fn reallocate(&mut self, count: u64) -> Result<()> {
        let old_size = self.size();
        self.data.reallocate(count)?;
        if let Some(cache) = self.manager() {
            cache.notify_entry_size_changed(old_size, self.size());
        }
        Ok(())
    }

    #[inline]
    pub fn key(&self) -> &HashKey<P> {
        &self.key
    }

    #[inline]
    pub fn hash_key(&self) -> u64 {
        self.key.hash()
    }

    #[inline]
    pub fn time(&self) -> SequenceTime {
        self.key.time()
    }

    #[inline]
    pub fn params(&self) -> &Arc<NonKeyParams> {
        &self.params
    }

    /// Byte size of the buffer
    #[inline]
    pub fn size(&self) -> usize {
        self.data.size()
    }

    #[inline]
    pub fn storage_mode(&self) -> StorageMode {
        self.data.storage_mode()
    }

    #[inline]
    pub fn is_stored_on_disk(&self) -> bool {
        self.data.storage_mode() == StorageMode::Disk
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.data.is_allocated()
    }

    /// Whether storage is committed and reported to the cache
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.resident
    }

    pub fn backing_path(&self) -> Option<&Path> {
        self.data.path()
    }

    pub fn readable(&self) -> Option<&[T]> {
        self.data.readable()
    }

    pub fn writable(&mut self) -> Option<&mut [T]> {
        self.data.writable()
    }

    /// Flush a disk entry's mapping
    pub fn flush(&self) -> Result<()> {
        self.data.flush()
    }
}

impl<T: Pod, P: KeyParams> Drop for CacheEntry<T, P> {
    fn drop(&mut self) {
        self.deallocate();
    }
}

impl<T: Pod, P: KeyParams> fmt::Debug for CacheEntry<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("hash", &format_args!("{:016x}", self.hash_key()))
            .field("time", &self.time())
            .field("size", &self.size())
            .field("storage", &self.storage_mode())
            .field("resident", &self.resident)
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::FrameKey;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        SizeChanged(usize, usize),
        Allocated(SequenceTime, usize),
        Destroyed(SequenceTime, usize, StorageMode),
        StorageChanged(StorageMode, StorageMode, SequenceTime, usize),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl CacheApi for Recorder {
        fn notify_entry_size_changed(&self, old_size: usize, new_size: usize) {
            self.events.lock().push(Event::SizeChanged(old_size, new_size));
        }

        fn notify_entry_allocated(&self, time: SequenceTime, size: usize) {
            self.events.lock().push(Event::Allocated(time, size));
        }

        fn notify_entry_destroyed(&self, time: SequenceTime, size: usize, storage: StorageMode) {
            self.events.lock().push(Event::Destroyed(time, size, storage));
        }

        fn notify_entry_storage_changed(
            &self,
            old_storage: StorageMode,
            new_storage: StorageMode,
            time: SequenceTime,
            size: usize,
        ) {
            self.events
                .lock()
                .push(Event::StorageChanged(old_storage, new_storage, time, size));
        }
    }

    fn frame_key() -> HashKey<FrameKey> {
        HashKey::new(FrameKey::new(1920, 1080, "rgba").with_time(5))
    }

    fn entry(
        recorder: &Arc<Recorder>,
        params: NonKeyParams,
    ) -> CacheEntry<f32, FrameKey> {
        CacheEntry::with_cache(frame_key(), Arc::new(params), recorder)
    }

    #[test]
    fn test_ram_entry_lifecycle() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::ram(1000));

        assert!(recorder.take().is_empty());
        e.allocate_memory(false, Path::new("")).unwrap();
        assert!(e.is_allocated());
        assert_eq!(e.size(), 4000);
        assert_eq!(recorder.take(), vec![Event::Allocated(5, 4000)]);

        e.deallocate();
        e.deallocate();
        assert_eq!(
            recorder.take(),
            vec![Event::Destroyed(5, 4000, StorageMode::Ram)]
        );
        assert!(!e.is_allocated());
    }

    #[test]
    fn test_allocate_memory_twice_reports_once() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::ram(10));
        e.allocate_memory(false, Path::new("")).unwrap();
        e.allocate_memory(false, Path::new("")).unwrap();
        assert_eq!(recorder.take(), vec![Event::Allocated(5, 40)]);
    }

    #[test]
    fn test_disk_entry_lifecycle() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::disk(1000));

        e.allocate_memory(false, dir.path()).unwrap();
        let path = e.cache_file_path(dir.path()).unwrap();
        assert_eq!(e.backing_path(), Some(path.as_path()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4000);
        assert!(e.is_stored_on_disk());

        e.writable().unwrap()[999] = 1.25;

        e.deallocate();
        assert!(path.exists());
        assert!(e.writable().is_none());

        e.reopen_file_mapping().unwrap();
        assert_eq!(e.readable().unwrap()[999], 1.25);

        e.deallocate();
        e.remove_any_backing_file().unwrap();
        assert!(!path.exists());

        assert_eq!(
            recorder.take(),
            vec![
                Event::Allocated(5, 4000),
                Event::StorageChanged(StorageMode::Ram, StorageMode::Disk, 5, 4000),
                Event::StorageChanged(StorageMode::Disk, StorageMode::Ram, 5, 4000),
                Event::StorageChanged(StorageMode::Ram, StorageMode::Disk, 5, 4000),
                Event::Destroyed(5, 4000, StorageMode::Disk),
            ]
        );
    }

    #[test]
    fn test_remove_backing_file_requires_deallocation() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::disk(4));
        e.allocate_memory(false, dir.path()).unwrap();

        assert_matches!(e.remove_any_backing_file(), Err(Error::StillMapped(_)));

        let mut ram = entry(&recorder, NonKeyParams::ram(4));
        ram.allocate_memory(false, Path::new("")).unwrap();
        assert_matches!(ram.remove_any_backing_file(), Err(Error::InvalidState(_)));
    }

    #[test]
    fn test_restore_from_existing_file() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());

        {
            let mut first = entry(&recorder, NonKeyParams::disk(8));
            first.allocate_memory(false, dir.path()).unwrap();
            first
                .writable()
                .unwrap()
                .copy_from_slice(&[0.5, 1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 7.5]);
            first.flush().unwrap();
        }
        recorder.take();

        // Parameters may not know the size: restore adopts the file's length
        let mut second = entry(&recorder, NonKeyParams::new(0, 1));
        second.allocate_memory(true, dir.path()).unwrap();
        assert_eq!(second.size(), 32);
        assert_eq!(second.readable().unwrap()[7], 7.5);
        assert_eq!(recorder.take(), vec![Event::Allocated(5, 32)]);
    }

    #[test]
    fn test_failed_restore_reports_nothing() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::disk(8));

        let err = e.allocate_memory(true, dir.path()).unwrap_err();
        assert!(err.is_allocation_failure());
        assert!(!e.is_allocated());
        assert!(!e.is_resident());

        drop(e);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_restore_with_empty_path_fails() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::disk(8));
        assert_matches!(
            e.allocate_memory(true, Path::new("")),
            Err(Error::AllocationFailed { .. })
        );
    }

    #[test]
    fn test_disk_without_path_falls_back_to_ram() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::disk(8));
        e.allocate_memory(false, Path::new("")).unwrap();

        assert_eq!(e.storage_mode(), StorageMode::Ram);
        assert_eq!(e.size(), 32);

        drop(e);
        assert_eq!(
            recorder.take(),
            vec![
                Event::Allocated(5, 32),
                Event::Destroyed(5, 32, StorageMode::Ram)
            ]
        );
    }

    #[test]
    fn test_reallocate_reports_delta() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::ram(10));
        e.allocate_memory(false, Path::new("")).unwrap();
        recorder.take();

        e.reallocate(25).unwrap();
        assert_eq!(e.size(), 100);
        assert_eq!(recorder.take(), vec![Event::SizeChanged(40, 100)]);
    }

    #[test]
    fn test_reallocate_failure_reports_nothing() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::ram(10));
        assert_matches!(e.reallocate(20), Err(Error::NotAllocated));
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_placeholder_entry() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::placeholder());
        e.allocate_memory(false, Path::new("")).unwrap();

        assert!(!e.is_allocated());
        assert!(e.writable().is_none());
        drop(e);
        assert_eq!(
            recorder.take(),
            vec![
                Event::Allocated(5, 0),
                Event::Destroyed(5, 0, StorageMode::Ram)
            ]
        );
    }

    #[test]
    fn test_drop_reports_release() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let e = {
            let mut e = entry(&recorder, NonKeyParams::disk(2));
            e.allocate_memory(false, dir.path()).unwrap();
            e
        };
        let path = e.backing_path().unwrap().to_path_buf();
        drop(e);

        // Dropping a disk entry evicts it to disk, the file survives
        assert!(path.exists());
        assert_eq!(
            recorder.take(),
            vec![
                Event::Allocated(5, 8),
                Event::StorageChanged(StorageMode::Ram, StorageMode::Disk, 5, 8)
            ]
        );
    }

    #[test]
    fn test_dead_cache_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let mut e = entry(&recorder, NonKeyParams::ram(4));
        drop(recorder);

        e.allocate_memory(false, Path::new("")).unwrap();
        e.reallocate(8).unwrap();
        e.deallocate();
    }

    #[test]
    fn test_detached_entry() {
        let mut e: CacheEntry<u8, FrameKey> =
            CacheEntry::detached(frame_key(), Arc::new(NonKeyParams::ram(3)));
        e.allocate_memory(false, Path::new("")).unwrap();
        e.writable().unwrap().copy_from_slice(b"abc");
        assert_eq!(e.readable().unwrap(), b"abc");
        assert_eq!(e.hash_key(), frame_key().hash());
    }

    #[test]
    fn test_cache_file_path_is_hash_derived() {
        let recorder = Arc::new(Recorder::default());
        let e = entry(&recorder, NonKeyParams::disk(1));
        let hash = e.hash_key();
        let path = e.cache_file_path(Path::new("/tmp/cache")).unwrap();

        assert_eq!(layout::hash_from_path(&path), Some(hash));
        assert_matches!(e.cache_file_path(Path::new("")), Err(Error::InvalidPath(_)));
    }

    #[test]
    fn test_debug_format() {
        let recorder = Arc::new(Recorder::default());
        let e = entry(&recorder, NonKeyParams::ram(1));
        let debug = format!("{:?}", e);
        assert!(debug.contains("CacheEntry"));
        assert!(debug.contains("resident"));
    }
}
