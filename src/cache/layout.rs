//! Disk Cache Layout
//!
//! Cache files live under a two-level fan-out derived from the entry hash:
//!
//! ```text
//! <base>/<n0><n1>/<rest>.fcache
//!
//! n0   = top nibble of the hash
//! n1   = second nibble
//! rest = hash with the top byte cleared, lower-case hex, unpadded
//! ```
//!
//! For `0xA3F1_0000_0000_0042` this is `a3/f1000000000042.fcache`. The bucket
//! name limits the top level to 256 directories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::CACHE_FILE_EXT;
use crate::error::{Error, Result};

/// Mask keeping everything below the bucket byte
const REST_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Bucket directory name for a hash
#[inline]
pub fn bucket_for_hash(hash: u64) -> String {
    format!("{:x}{:x}", hash >> 60, (hash >> 56) & 0xF)
}

/// Path of a hash relative to the cache base directory
pub fn relative_path_for_hash(hash: u64) -> PathBuf {
    PathBuf::from(bucket_for_hash(hash)).join(format!("{:x}.{}", hash & REST_MASK, CACHE_FILE_EXT))
}

/// Full path of a hash under `base`. An empty base is rejected.
pub fn path_for_hash(base: &Path, hash: u64) -> Result<PathBuf> {
    if base.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("{:016x}", hash)));
    }
    Ok(base.join(relative_path_for_hash(hash)))
}

/// Recover the hash from a cache file path, `None` for anything else
pub fn hash_from_path(path: &Path) -> Option<u64> {
    if path.extension()? != CACHE_FILE_EXT {
        return None;
    }
    let bucket = path.parent()?.file_name()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;

    if bucket.len() != 2 || stem.is_empty() || stem.len() > 14 {
        return None;
    }
    let top = u64::from_str_radix(bucket, 16).ok()?;
    let rest = u64::from_str_radix(stem, 16).ok()?;

    let hash = (top << 56) | rest;
    // Reject non-canonical spellings (upper case, zero padding)
    (relative_path_for_hash(hash) == Path::new(bucket).join(path.file_name()?)).then_some(hash)
}

/// A cache file found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheFile {
    pub hash: u64,
    pub path: PathBuf,
    /// File length in bytes
    pub size: u64,
}

/// List every cache file under `base`, sorted by hash.
///
/// A missing base directory yields an empty list. Foreign files are skipped.
pub fn scan(base: &Path) -> Result<Vec<DiskCacheFile>> {
    let mut files = Vec::new();
    if !base.is_dir() {
        return Ok(files);
    }

    for bucket in std::fs::read_dir(base)? {
        let bucket = bucket?;
        if !bucket.file_type()?.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(bucket.path())? {
            let entry = entry?;
            let path = entry.path();
            let Some(hash) = hash_from_path(&path) else {
                continue;
            };
            match entry.metadata() {
                Ok(meta) if meta.is_file() => files.push(DiskCacheFile {
                    hash,
                    path,
                    size: meta.len(),
                }),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache file"),
            }
        }
    }

    files.sort_by_key(|f| f.hash);
    Ok(files)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bucket_is_two_top_nibbles() {
        assert_eq!(bucket_for_hash(0xA3F1_0000_0000_0000), "a3");
        assert_eq!(bucket_for_hash(0x0000_0000_0000_0001), "00");
        assert_eq!(bucket_for_hash(0xFF00_0000_0000_0000), "ff");
    }

    #[test]
    fn test_relative_path() {
        let path = relative_path_for_hash(0xA3F1_0000_0000_0042);
        assert_eq!(path, Path::new("a3").join("f1000000000042.fcache"));

        // Leading zeros of the remainder are not padded
        let path = relative_path_for_hash(0x0500_0000_0000_00AB);
        assert_eq!(path, Path::new("05").join("ab.fcache"));
    }

    #[test]
    fn test_empty_base_rejected() {
        assert!(matches!(
            path_for_hash(Path::new(""), 1),
            Err(Error::InvalidPath(_))
        ));
        let full = path_for_hash(Path::new("/tmp/cache"), 0xA3F1_0000_0000_0042).unwrap();
        assert_eq!(full, Path::new("/tmp/cache/a3/f1000000000042.fcache"));
    }

    #[test]
    fn test_hash_from_path_round_trip() {
        for hash in [0u64, 1, 0xA3F1_0000_0000_0042, u64::MAX, 0x0100_0000_0000_0000] {
            let path = path_for_hash(Path::new("/base"), hash).unwrap();
            assert_eq!(hash_from_path(&path), Some(hash));
        }
    }

    #[test]
    fn test_hash_from_path_rejects_foreign_files() {
        assert_eq!(hash_from_path(Path::new("/base/a3/f1.txt")), None);
        assert_eq!(hash_from_path(Path::new("/base/abc/f1.fcache")), None);
        assert_eq!(hash_from_path(Path::new("/base/a3/zz.fcache")), None);
        assert_eq!(hash_from_path(Path::new("/base/A3/f1.fcache")), None);
        assert_eq!(hash_from_path(Path::new("/base/a3/00f1.fcache")), None);
    }

    #[test]
    fn test_scan_lists_cache_files() {
        let dir = TempDir::new().unwrap();
        let hashes = [0xA3F1_0000_0000_0042u64, 0x0000_0000_0000_0007];
        for (i, hash) in hashes.iter().enumerate() {
            let path = path_for_hash(dir.path(), *hash).unwrap();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, vec![0u8; (i + 1) * 10]).unwrap();
        }
        std::fs::write(dir.path().join("a3").join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("stray"), b"x").unwrap();

        let files = scan(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].hash, 7);
        assert_eq!(files[0].size, 20);
        assert_eq!(files[1].hash, 0xA3F1_0000_0000_0042);
        assert_eq!(files[1].size, 10);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan(&dir.path().join("nope")).unwrap().is_empty());
    }
}
