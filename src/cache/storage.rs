//! Storage Buffer
//!
//! Typed, resizable memory region living either on the heap or in a
//! memory-mapped cache file. The cost hint given to [`StorageBuffer::allocate`]
//! selects the device: negative skips allocation, zero is RAM, positive is disk.
//!
//! # State
//!
//! ```text
//! Unallocated --allocate(RAM)--> Ram --deallocate--> Unallocated
//! Unallocated --allocate(Disk)--> Disk(mapped) --deallocate--> Disk(unmapped)
//! Disk(unmapped) --reopen_file_mapping--> Disk(mapped)
//! Disk(unmapped) --remove_any_backing_file--> Unallocated (file gone)
//! ```
//!
//! Not thread-safe for mutation; the owning cache serialises allocation,
//! reallocation and reopening. Concurrent `readable()` is fine.

use std::fmt;
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::memory_file::{MemoryFile, OpenMode};
use super::params::AllocationTarget;
use crate::error::{Error, Result};

/// Device holding a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMode {
    /// Heap memory
    Ram,
    /// Memory-mapped file
    Disk,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Ram => write!(f, "RAM"),
            StorageMode::Disk => write!(f, "Disk"),
        }
    }
}

enum Backing<T> {
    Unallocated,
    Ram(Vec<T>),
    /// The path is remembered while the mapping is closed
    Disk {
        path: PathBuf,
        file: Option<MemoryFile>,
    },
}

/// Buffer of `T` in RAM or on disk
pub struct StorageBuffer<T> {
    backing: Backing<T>,
    /// Byte size, always a multiple of `size_of::<T>()` except for restored files
    size: usize,
}

impl<T: Pod> Default for StorageBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod> StorageBuffer<T> {
    /// Empty, unallocated buffer
    pub fn new() -> Self {
        Self {
            backing: Backing::Unallocated,
            size: 0,
        }
    }

    fn byte_size(count: u64) -> Result<usize> {
        count
            .checked_mul(size_of::<T>() as u64)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| {
                Error::allocation(usize::MAX, format!("{} elements overflow the address space", count))
            })
    }

    /// Commit storage for `count` elements.
    ///
    /// One-shot: a buffer that already holds storage (or remembers a disk
    /// file) is left untouched. If the mapping at `path` cannot be opened the
    /// buffer falls back to RAM once, keeping `count`.
    pub fn allocate(&mut self, count: u64, cost: i32, path: &Path) -> Result<()> {
        if !matches!(self.backing, Backing::Unallocated) {
            debug!(count, cost, "allocate called on a committed buffer, ignoring");
            return Ok(());
        }

        match AllocationTarget::from_cost(cost) {
            AllocationTarget::Skip => Ok(()),
            AllocationTarget::Ram => self.allocate_ram(count, Self::byte_size(count)?),
            AllocationTarget::Disk => self.allocate_disk(count, Self::byte_size(count)?, path),
        }
    }

    fn allocate_ram(&mut self, count: u64, bytes: usize) -> Result<()> {
        let count = usize::try_from(count)
            .map_err(|_| Error::allocation(bytes, "element count exceeds the address space"))?;

        let mut data: Vec<T> = Vec::new();
        data.try_reserve_exact(count)
            .map_err(|e| Error::allocation(bytes, e.to_string()))?;
        data.resize(count, T::zeroed());

        debug!(bytes, "allocated RAM buffer");
        self.backing = Backing::Ram(data);
        self.size = bytes;
        Ok(())
    }

    fn allocate_disk(&mut self, count: u64, bytes: usize, path: &Path) -> Result<()> {
        let existed = path.exists();
        let mut file = match MemoryFile::open(path, OpenMode::KeepOrCreate) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not open cache file mapping, falling back to RAM"
                );
                return self.allocate_ram(count, bytes);
            }
        };

        if count != 0 {
            let resized = file.resize(bytes).and_then(|_| {
                if file.data().is_some() {
                    Ok(())
                } else {
                    Err(io::Error::other("mapping has no data after resize"))
                }
            });
            if let Err(e) = resized {
                drop(file);
                if !existed {
                    let _ = std::fs::remove_file(path);
                }
                return Err(Error::allocation(bytes, e.to_string()));
            }
        }

        debug!(bytes, path = %path.display(), "mapped disk buffer");
        self.backing = Backing::Disk {
            path: path.to_path_buf(),
            file: Some(file),
        };
        self.size = bytes;
        Ok(())
    }

    /// Grow or shrink to `count` elements, keeping the common prefix.
    ///
    /// Pre-condition: storage is allocated (RAM, or disk with an open mapping).
    pub fn reallocate(&mut self, count: u64) -> Result<()> {
        let bytes = Self::byte_size(count)?;
        match &mut self.backing {
            Backing::Unallocated | Backing::Disk { file: None, .. } => {
                return Err(Error::NotAllocated)
            }
            Backing::Ram(data) => {
                let count = usize::try_from(count)
                    .map_err(|_| Error::allocation(bytes, "element count exceeds the address space"))?;
                if count > data.len() {
                    data.try_reserve_exact(count - data.len())
                        .map_err(|e| Error::allocation(bytes, e.to_string()))?;
                }
                data.resize(count, T::zeroed());
                data.shrink_to_fit();
            }
            Backing::Disk {
                file: Some(file), ..
            } => {
                file.resize(bytes)
                    .map_err(|e| Error::allocation(bytes, e.to_string()))?;
                if bytes != 0 && file.data().is_none() {
                    return Err(Error::allocation(bytes, "mapping has no data after resize"));
                }
            }
        }
        self.size = bytes;
        Ok(())
    }

    /// Re-open the mapping of a disk buffer whose mapping was closed.
    ///
    /// The file must still exist with the remembered length. Failure is
    /// fatal: `MappingOpenFailed`, an allocation failure.
    pub fn reopen_file_mapping(&mut self) -> Result<()> {
        let size = self.size;
        match &mut self.backing {
            Backing::Disk { path, file } if file.is_none() => {
                let reopened = MemoryFile::open(path.as_path(), OpenMode::OpenExisting)
                    .and_then(|reopened| {
                        if reopened.len() == size {
                            Ok(reopened)
                        } else {
                            Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("expected {} bytes, found {}", size, reopened.len()),
                            ))
                        }
                    })
                    .map_err(|source| {
                        error!(path = %path.display(), size, error = %source, "failed to re-open cache file mapping");
                        Error::MappingOpenFailed {
                            path: path.clone(),
                            source,
                        }
                    })?;
                *file = Some(reopened);
                Ok(())
            }
            Backing::Disk { .. } => Err(Error::InvalidState(
                "file mapping is already open".to_string(),
            )),
            _ => Err(Error::InvalidState(
                "only disk buffers can re-open a mapping".to_string(),
            )),
        }
    }

    /// Adopt an existing cache file, taking its on-disk length as the size
    pub fn restore_buffer_from_file(&mut self, path: &Path) -> Result<()> {
        if matches!(
            self.backing,
            Backing::Ram(_) | Backing::Disk { file: Some(_), .. }
        ) {
            return Err(Error::InvalidState(
                "cannot restore into a buffer that holds storage".to_string(),
            ));
        }

        let file = MemoryFile::open(path, OpenMode::OpenExisting)
            .map_err(|e| Error::allocation(0, format!("{}: {}", path.display(), e)))?;

        self.size = file.len();
        self.backing = Backing::Disk {
            path: path.to_path_buf(),
            file: Some(file),
        };
        Ok(())
    }

    /// Free RAM or close the mapping. The backing file is kept. Idempotent.
    pub fn deallocate(&mut self) {
        // A closed disk buffer keeps its size: the file still holds the bytes
        if let Backing::Disk { file, .. } = &mut self.backing {
            file.take();
            return;
        }
        self.backing = Backing::Unallocated;
        self.size = 0;
    }

    /// Delete the backing file of an unmapped disk buffer.
    ///
    /// Returns whether a file was removed. Errors with `StillMapped` while the
    /// mapping is open.
    pub fn remove_any_backing_file(&mut self) -> Result<bool> {
        let removed = match &self.backing {
            Backing::Disk {
                path,
                file: Some(_),
            } => return Err(Error::StillMapped(path.clone())),
            Backing::Disk { path, file: None } => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                    true
                } else {
                    false
                }
            }
            _ => return Ok(false),
        };
        self.backing = Backing::Unallocated;
        self.size = 0;
        Ok(removed)
    }

    /// Size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size in whole elements
    #[inline]
    pub fn len(&self) -> usize {
        self.size / size_of::<T>().max(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a usable pointer exists: heap memory or a non-empty mapping
    pub fn is_allocated(&self) -> bool {
        match &self.backing {
            Backing::Unallocated => false,
            Backing::Ram(_) => true,
            Backing::Disk { file, .. } => file.as_ref().is_some_and(|f| f.data().is_some()),
        }
    }

    /// Whether storage or a remembered disk file is held, mapped or not
    pub fn is_committed(&self) -> bool {
        !matches!(self.backing, Backing::Unallocated)
    }

    /// Whether a disk mapping is currently open
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Disk { file: Some(_), .. })
    }

    /// RAM until a disk file has been committed
    pub fn storage_mode(&self) -> StorageMode {
        match self.backing {
            Backing::Disk { .. } => StorageMode::Disk,
            _ => StorageMode::Ram,
        }
    }

    /// Backing file path of a disk buffer
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk { path, .. } => Some(path.as_path()),
            _ => None,
        }
    }

    /// Read view; `None` when nothing is allocated or mapped
    pub fn readable(&self) -> Option<&[T]> {
        match &self.backing {
            Backing::Unallocated => None,
            Backing::Ram(data) => Some(data.as_slice()),
            Backing::Disk { file, .. } => {
                let bytes = file.as_ref()?.data()?;
                bytemuck::try_cast_slice(Self::whole_elements(bytes)).ok()
            }
        }
    }

    /// Write view; `None` for a disk buffer whose mapping is closed
    pub fn writable(&mut self) -> Option<&mut [T]> {
        match &mut self.backing {
            Backing::Unallocated => None,
            Backing::Ram(data) => Some(data.as_mut_slice()),
            Backing::Disk { file, .. } => {
                let bytes = file.as_mut()?.data_mut()?;
                let whole = bytes.len() - bytes.len() % size_of::<T>().max(1);
                bytemuck::try_cast_slice_mut(&mut bytes[..whole]).ok()
            }
        }
    }

    fn whole_elements(bytes: &[u8]) -> &[u8] {
        let whole = bytes.len() - bytes.len() % size_of::<T>().max(1);
        &bytes[..whole]
    }

    /// Flush a mapped buffer to disk; no-op in RAM
    pub fn flush(&self) -> Result<()> {
        if let Backing::Disk {
            file: Some(file), ..
        } = &self.backing
        {
            file.flush()?;
        }
        Ok(())
    }
}

impl<T> fmt::Debug for StorageBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, path) = match &self.backing {
            Backing::Unallocated => ("unallocated", None),
            Backing::Ram(_) => ("ram", None),
            Backing::Disk { path, file: Some(_) } => ("disk-mapped", Some(path)),
            Backing::Disk { path, file: None } => ("disk-unmapped", Some(path)),
        };
        f.debug_struct("StorageBuffer")
            .field("state", &state)
            .field("size", &self.size)
            .field("path", &path)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
