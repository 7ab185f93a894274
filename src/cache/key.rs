//! Cache Keys
//!
//! A key is the set of parameters that identify a unique element in the cache.
//! The 64-bit fingerprint is computed lazily the first time it is asked for and
//! memoised until the owner of the parameters calls [`HashKey::reset_hash`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::hash::Hash64;

/// Frame number within an image sequence
pub type SequenceTime = i32;

/// Identifying parameters of a key.
///
/// `fill_hash` must append every identifying field in a fixed order; the
/// accumulator is order-sensitive, so reordering fields changes every hash
/// and orphans any file already cached on disk.
pub trait KeyParams: Send + Sync {
    /// Append the identifying fields, in canonical order
    fn fill_hash(&self, hash: &mut Hash64);

    /// Time reported alongside every manager notification
    fn time(&self) -> SequenceTime;
}

/// Key with a memoised fingerprint
pub struct HashKey<P> {
    params: P,
    hash: AtomicU64,
    computed: AtomicBool,
}

impl<P: KeyParams> HashKey<P> {
    /// Create a key; the hash is not computed until first requested
    pub fn new(params: P) -> Self {
        Self {
            params,
            hash: AtomicU64::new(0),
            computed: AtomicBool::new(false),
        }
    }

    /// Get the fingerprint, computing it on first use after construction or reset.
    ///
    /// Two threads racing on the first call both compute the same value.
    pub fn hash(&self) -> u64 {
        if self.computed.load(Ordering::Acquire) {
            return self.hash.load(Ordering::Relaxed);
        }
        let value = Self::compute(&self.params);
        self.hash.store(value, Ordering::Relaxed);
        self.computed.store(true, Ordering::Release);
        value
    }

    /// Mark the fingerprint stale; recomputed lazily on the next `hash()`
    pub fn reset_hash(&self) {
        self.computed.store(false, Ordering::Release);
    }

    /// Whether a fingerprint is currently memoised
    pub fn is_hash_computed(&self) -> bool {
        self.computed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn params(&self) -> &P {
        &self.params
    }

    /// Mutable access to the parameters. Does not invalidate the memo.
    #[inline]
    pub fn params_mut(&mut self) -> &mut P {
        &mut self.params
    }

    #[inline]
    pub fn time(&self) -> SequenceTime {
        self.params.time()
    }

    fn compute(params: &P) -> u64 {
        let mut hash = Hash64::new();
        params.fill_hash(&mut hash);
        hash.compute_hash();
        hash.value()
    }
}

impl<P: KeyParams + Clone> Clone for HashKey<P> {
    /// The copy trusts the original's hash and never recomputes it
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            hash: AtomicU64::new(self.hash()),
            computed: AtomicBool::new(true),
        }
    }
}

impl<P: KeyParams> PartialEq for HashKey<P> {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl<P: KeyParams> Eq for HashKey<P> {}

impl<P: KeyParams + fmt::Debug> fmt::Debug for HashKey<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashKey")
            .field("params", &self.params)
            .field("hash", &format_args!("{:016x}", self.hash()))
            .finish()
    }
}

impl<P: KeyParams> From<P> for HashKey<P> {
    fn from(params: P) -> Self {
        Self::new(params)
    }
}

// =============================================================================
// Frame Key
// =============================================================================

/// Key of a rendered frame.
///
/// Canonical hash order is the field declaration order:
/// `time, view, width, height, mipmap_level, channels, node_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameKey {
    pub time: SequenceTime,
    pub view: i32,
    pub width: u32,
    pub height: u32,
    pub mipmap_level: u32,
    pub channels: String,
    /// Hash of the node tree that produced the frame
    pub node_hash: u64,
}

impl FrameKey {
    pub fn new(width: u32, height: u32, channels: impl Into<String>) -> Self {
        Self {
            time: 0,
            view: 0,
            width,
            height,
            mipmap_level: 0,
            channels: channels.into(),
            node_hash: 0,
        }
    }

    pub fn with_time(mut self, time: SequenceTime) -> Self {
        self.time = time;
        self
    }

    pub fn with_view(mut self, view: i32) -> Self {
        self.view = view;
        self
    }

    pub fn with_mipmap_level(mut self, level: u32) -> Self {
        self.mipmap_level = level;
        self
    }

    pub fn with_node_hash(mut self, node_hash: u64) -> Self {
        self.node_hash = node_hash;
        self
    }

    /// Channel count implied by the channel layout name ("rgba" -> 4)
    pub fn channel_count(&self) -> usize {
        self.channels.chars().count().max(1)
    }

    /// Pixel elements needed to hold the frame
    pub fn elements_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.channel_count() as u64
    }
}

impl KeyParams for FrameKey {
    fn fill_hash(&self, hash: &mut Hash64) {
        hash.append_i32(self.time);
        hash.append_i32(self.view);
        hash.append_u32(self.width);
        hash.append_u32(self.height);
        hash.append_u32(self.mipmap_level);
        hash.append_str(&self.channels);
        hash.append(self.node_hash);
    }

    fn time(&self) -> SequenceTime {
        self.time
    }
}

// =============================================================================
// Tests
// =============================================================================
