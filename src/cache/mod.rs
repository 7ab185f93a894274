//! Frame Cache Entries
//!
//! Storage core of an image-processing cache: every cached element is a
//! [`CacheEntry`] identified by the 64-bit hash of its key, holding a typed
//! buffer that lives on the heap or in a memory-mapped file.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          EntryRegistry                               │
//! │              DashMap<hash, Arc<RwLock<CacheEntry>>>                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  CacheEntry<T, P>                                                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────────┐   │
//! │  │ HashKey<P>   │  │ NonKeyParams │  │ StorageBuffer<T>          │   │
//! │  │ (lazy hash)  │  │ (count,cost) │  │ RAM Vec  | MemoryFile     │   │
//! │  └──────────────┘  └──────────────┘  └───────────────────────────┘   │
//! │          │ notifications (Weak handle)                               │
//! │          ▼                                                           │
//! │  CacheApi ── UsageTracker (RAM / disk accounting)                    │
//! └──────────────────────────────────────────────────────────────────────┘
//!                │ disk entries
//!                ▼
//!   <cache_dir>/<bucket>/<rest>.fcache     (see [`layout`])
//! ```
//!
//! # Cost hint
//!
//! - `cost < 0`: allocation skipped (placeholder entry)
//! - `cost == 0`: RAM
//! - `cost >= 1`: memory-mapped file, falling back to RAM once if the
//!   mapping cannot be opened

mod api;
mod config;
mod entry;
mod hash;
mod key;
mod memory_file;
mod params;
mod registry;
mod storage;
mod usage;
pub mod layout;

#[cfg(test)]
mod proptest;

pub use api::CacheApi;
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use hash::{crc64, Hash64};
pub use key::{FrameKey, HashKey, KeyParams, SequenceTime};
pub use layout::DiskCacheFile;
pub use memory_file::{MemoryFile, OpenMode};
pub use params::{AllocationTarget, NonKeyParams};
pub use registry::{EntryHandle, EntryRegistry, RegistryStats};
pub use storage::{StorageBuffer, StorageMode};
pub use usage::{UsageSnapshot, UsageTracker};

/// Extension of every cache file
pub const CACHE_FILE_EXT: &str = "fcache";

/// Number of bucket directories under the cache root (two hex nibbles)
pub const BUCKET_COUNT: usize = 256;

// =============================================================================
// Tests
// =============================================================================
