//! Memory-Mapped Cache File
//!
//! A resizable read/write mapping of one cache file. Dropping the handle
//! flushes and unmaps; the file itself stays on disk.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::warn;

/// How to open the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Keep an existing file untouched, create it (and its parents) otherwise
    KeepOrCreate,
    /// Fail if the file does not exist
    OpenExisting,
}

/// Memory-mapped file
pub struct MemoryFile {
    path: PathBuf,
    file: File,
    /// `None` while the file is empty (zero-length mappings are not allowed)
    mmap: Option<MmapMut>,
}

impl MemoryFile {
    /// Open and map `path`
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> io::Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty cache file path",
            ));
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true);

        if mode == OpenMode::KeepOrCreate {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            options.create(true).truncate(false);
        }

        let file = options.open(path)?;
        let len = file.metadata()?.len();
        let mmap = Self::map(&file, len)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    fn map(file: &File, len: u64) -> io::Result<Option<MmapMut>> {
        if len == 0 {
            return Ok(None);
        }
        // SAFETY: cache files are owned by this process; nothing else truncates
        // them while mapped.
        let mmap = unsafe { MmapOptions::new().map_mut(file)? };
        Ok(Some(mmap))
    }

    /// Resize the file to `bytes` and remap it. Existing content up to the
    /// smaller of the two lengths is preserved.
    pub fn resize(&mut self, bytes: usize) -> io::Result<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
        }
        self.file.set_len(bytes as u64)?;
        self.mmap = Self::map(&self.file, bytes as u64)?;
        Ok(())
    }

    /// Mapped bytes, `None` for an empty file
    #[inline]
    pub fn data(&self) -> Option<&[u8]> {
        self.mmap.as_deref()
    }

    #[inline]
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.mmap.as_deref_mut()
    }

    /// Mapped length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write dirty pages back to the file
    pub fn flush(&self) -> io::Result<()> {
        match &self.mmap {
            Some(mmap) => mmap.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush cache file mapping");
        }
    }
}

impl std::fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFile")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
