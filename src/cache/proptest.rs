//! Property-Based Tests for Cache Entries
//!
//! # Test Properties
//!
//! 1. **Determinism**: equal key fields always give the same hash
//! 2. **Order Sensitivity**: swapping two distinct words changes the hash
//! 3. **Path Round-trip**: every hash survives hash -> path -> hash
//! 4. **Allocation Sizes**: RAM buffers hold exactly `count * size_of::<T>()` bytes

#![cfg(test)]

use std::path::Path;

use proptest::prelude::*;

use super::hash::Hash64;
use super::key::{FrameKey, HashKey};
use super::layout;
use super::storage::{StorageBuffer, StorageMode};
use super::BUCKET_COUNT;

// =============================================================================
// Property Strategies
// =============================================================================

fn channels_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["r", "rgb", "rgba", "a", "xyz", "uv"]).prop_map(String::from)
}

fn frame_key_strategy() -> impl Strategy<Value = FrameKey> {
    (
        any::<i32>(),
        0i32..4,
        1u32..8192,
        1u32..8192,
        0u32..8,
        channels_strategy(),
        any::<u64>(),
    )
        .prop_map(|(time, view, width, height, level, channels, node_hash)| {
            FrameKey::new(width, height, channels)
                .with_time(time)
                .with_view(view)
                .with_mipmap_level(level)
                .with_node_hash(node_hash)
        })
}

fn hash_words(words: &[u64]) -> u64 {
    let mut hash = Hash64::new();
    for word in words {
        hash.append(*word);
    }
    hash.compute_hash();
    hash.value()
}

// =============================================================================
// Hash Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Two keys built from the same fields agree, and so does a clone
    #[test]
    fn prop_key_hash_deterministic(fields in frame_key_strategy()) {
        let a = HashKey::new(fields.clone());
        let b = HashKey::new(fields);
        prop_assert_eq!(a.hash(), b.hash());
        prop_assert_eq!(a.clone().hash(), a.hash());
    }

    /// Reset then recompute yields the same value for unchanged fields
    #[test]
    fn prop_reset_recomputes_same_value(fields in frame_key_strategy()) {
        let key = HashKey::new(fields);
        let first = key.hash();
        key.reset_hash();
        prop_assert_eq!(key.hash(), first);
    }

    /// The accumulator is order-sensitive
    #[test]
    fn prop_swapping_words_changes_hash(a in any::<u64>(), b in any::<u64>(), tail in any::<u64>()) {
        prop_assume!(a != b);
        prop_assert_ne!(hash_words(&[a, b, tail]), hash_words(&[b, a, tail]));
    }

    /// A changed time always yields a different key
    #[test]
    fn prop_time_changes_hash(fields in frame_key_strategy(), delta in 1i32..1000) {
        let other = fields.clone().with_time(fields.time.wrapping_add(delta));
        prop_assert_ne!(HashKey::new(fields).hash(), HashKey::new(other).hash());
    }
}

// =============================================================================
// Layout Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_path_round_trip(hash in any::<u64>()) {
        let path = layout::path_for_hash(Path::new("/cache"), hash).unwrap();
        prop_assert_eq!(layout::hash_from_path(&path), Some(hash));
    }

    #[test]
    fn prop_bucket_in_range(hash in any::<u64>()) {
        let bucket = layout::bucket_for_hash(hash);
        prop_assert_eq!(bucket.len(), 2);
        let index = usize::from_str_radix(&bucket, 16).unwrap();
        prop_assert!(index < BUCKET_COUNT);
        prop_assert_eq!(index as u64, hash >> 56);
    }
}

// =============================================================================
// Allocation Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_ram_allocation_size(count in 0u64..65536) {
        let mut buf = StorageBuffer::<f32>::new();
        buf.allocate(count, 0, Path::new("")).unwrap();

        prop_assert_eq!(buf.storage_mode(), StorageMode::Ram);
        prop_assert_eq!(buf.size(), count as usize * 4);
        prop_assert_eq!(buf.len(), count as usize);
        prop_assert!(buf.readable().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn prop_reallocate_keeps_prefix(initial in 1u64..512, target in 0u64..1024) {
        let mut buf = StorageBuffer::<u16>::new();
        buf.allocate(initial, 0, Path::new("")).unwrap();
        for (i, v) in buf.writable().unwrap().iter_mut().enumerate() {
            *v = i as u16;
        }

        buf.reallocate(target).unwrap();
        prop_assert_eq!(buf.size(), target as usize * 2);

        let kept = initial.min(target) as usize;
        let data = buf.readable().unwrap();
        for (i, v) in data.iter().enumerate() {
            let expected = if i < kept { i as u16 } else { 0 };
            prop_assert_eq!(*v, expected);
        }
    }
}
