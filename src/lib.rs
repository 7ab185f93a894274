//! Framecache - Disk-Backed Frame Cache Entries
//!
//! Storage core of an image-processing cache. Each cached element owns a
//! typed buffer that lives either on the heap or in a memory-mapped file
//! whose location is derived from the 64-bit hash of the element's key, so a
//! later run can find and restore it.
//!
//! # Architecture
//!
//! ```text
//! HashKey (lazy hash) ─┐
//! NonKeyParams ────────┼──▶ CacheEntry ──▶ StorageBuffer ──▶ RAM | MemoryFile
//!                      │         │
//!                      │         └──notifications──▶ CacheApi (UsageTracker)
//!                      └──hash──▶ <cache_dir>/<bucket>/<rest>.fcache
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Keys, storage buffers, cache entries and the entry registry
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheApi, CacheConfig, CacheEntry, EntryRegistry, FrameKey, HashKey, KeyParams,
    NonKeyParams, StorageMode, UsageTracker,
};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
