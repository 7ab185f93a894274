//! Framecache Tool
//!
//! Inspect, exercise and purge an on-disk frame cache.
//!
//! ```text
//! framecache inspect            per-bucket file counts and bytes
//! framecache stress             allocate, fill, evict, reopen and verify entries
//! framecache purge              delete every cache file
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use framecache::cache::{layout, RegistryStats, UsageSnapshot};
use framecache::{
    CacheConfig, EntryRegistry, FrameKey, HashKey, NonKeyParams, StorageMode, UsageTracker,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Framecache - disk-backed frame cache tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache root directory
    #[arg(long, env = "FRAMECACHE_DIR", default_value_os_t = CacheConfig::default().cache_dir)]
    cache_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarise the cache files found on disk
    Inspect {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drive entries through their whole storage lifecycle
    Stress {
        /// Number of frame entries
        #[arg(long, default_value = "64")]
        entries: usize,

        /// Blocking worker threads
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Cost hint: negative skips allocation, 0 is RAM, positive is disk
        #[arg(long, default_value = "1", allow_negative_numbers = true)]
        cost: i32,

        /// Frame width in pixels
        #[arg(long, default_value = "256")]
        width: u32,

        /// Frame height in pixels
        #[arg(long, default_value = "256")]
        height: u32,

        /// Keep the cache files instead of clearing them at the end
        #[arg(long)]
        keep: bool,
    },

    /// Delete every cache file
    Purge {
        /// List what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct StressOptions {
    entries: usize,
    workers: usize,
    cost: i32,
    width: u32,
    height: u32,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("framecache {}", framecache::VERSION);
    info!("  Cache dir: {}", args.cache_dir.display());

    let config = CacheConfig::new(args.cache_dir.clone());
    config.validate().context("invalid cache configuration")?;

    match args.command {
        Command::Inspect { json } => run_inspect(&config.cache_dir, json),
        Command::Stress {
            entries,
            workers,
            cost,
            width,
            height,
            keep,
        } => {
            let opts = StressOptions {
                entries,
                workers: workers.max(1),
                cost,
                width,
                height,
            };
            run_stress(config, opts, keep).await
        }
        Command::Purge { dry_run } => run_purge(&config.cache_dir, dry_run),
    }
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Inspect
// =============================================================================

#[derive(Debug, Default, Serialize)]
struct BucketSummary {
    files: usize,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    cache_dir: PathBuf,
    files: usize,
    bytes: u64,
    buckets: BTreeMap<String, BucketSummary>,
}

fn run_inspect(cache_dir: &Path, json: bool) -> anyhow::Result<()> {
    let files = layout::scan(cache_dir)
        .with_context(|| format!("failed to scan {}", cache_dir.display()))?;

    let mut buckets: BTreeMap<String, BucketSummary> = BTreeMap::new();
    for file in &files {
        let bucket = buckets.entry(layout::bucket_for_hash(file.hash)).or_default();
        bucket.files += 1;
        bucket.bytes += file.size;
    }

    let report = InspectReport {
        cache_dir: cache_dir.to_path_buf(),
        files: files.len(),
        bytes: files.iter().map(|f| f.size).sum(),
        buckets,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", report.cache_dir.display());
    for (name, bucket) in &report.buckets {
        println!("  {}  {:>6} files  {:>14} bytes", name, bucket.files, bucket.bytes);
    }
    println!("total  {} files  {} bytes", report.files, report.bytes);
    Ok(())
}

// =============================================================================
// Stress
// =============================================================================

#[derive(Debug, Serialize)]
struct StressReport {
    entries: usize,
    workers: usize,
    cost: i32,
    evicted_to_disk: usize,
    verified: usize,
    elapsed_ms: u128,
    registry: RegistryStats,
    usage: UsageSnapshot,
}

type Registry = EntryRegistry<f32, FrameKey>;

fn frame_key(opts: &StressOptions, index: usize) -> HashKey<FrameKey> {
    HashKey::new(FrameKey::new(opts.width, opts.height, "rgba").with_time(index as i32))
}

fn fill_value(time: i32) -> f32 {
    time as f32 + 0.5
}

/// Allocate, fill and evict this worker's share of entries; returns the
/// hashes and times of entries left on disk
fn fill_worker(
    registry: &Registry,
    worker: usize,
    opts: &StressOptions,
) -> framecache::Result<Vec<(u64, i32)>> {
    let mut on_disk = Vec::new();
    for index in (worker..opts.entries).step_by(opts.workers) {
        let key = frame_key(opts, index);
        let params = NonKeyParams::new(key.params().elements_count(), opts.cost);
        let time = key.time();

        let (handle, created) = registry.get_or_create(key, Arc::new(params))?;
        let hash = {
            let mut entry = handle.write();
            if let Some(data) = entry.writable() {
                data.fill(fill_value(time));
            }
            entry.flush()?;
            entry.hash_key()
        };
        debug!(worker, time, created, "filled entry");

        if registry.evict_to_disk(hash) == Some(StorageMode::Disk) {
            on_disk.push((hash, time));
        }
    }
    Ok(on_disk)
}

/// Reopen evicted entries and check their content survived
fn verify_worker(registry: &Registry, entries: &[(u64, i32)]) -> anyhow::Result<usize> {
    let mut verified = 0;
    for &(hash, time) in entries {
        let Some(handle) = registry.get(hash)? else {
            bail!("entry {:016x} vanished after eviction", hash);
        };
        let entry = handle.read();
        let Some(data) = entry.readable() else {
            bail!("entry {:016x} has no data after reopening", hash);
        };
        let expected = fill_value(time);
        if let Some(pos) = data.iter().position(|v| *v != expected) {
            bail!(
                "entry {:016x} differs at element {}: {} != {}",
                hash,
                pos,
                data[pos],
                expected
            );
        }
        verified += 1;
    }
    Ok(verified)
}

async fn run_stress(config: CacheConfig, opts: StressOptions, keep: bool) -> anyhow::Result<()> {
    info!(
        entries = opts.entries,
        workers = opts.workers,
        cost = opts.cost,
        "starting stress run"
    );
    let started = Instant::now();

    let usage = Arc::new(UsageTracker::new());
    let registry: Arc<Registry> = Arc::new(EntryRegistry::new(config, usage.clone())?);

    let mut fillers = Vec::with_capacity(opts.workers);
    for worker in 0..opts.workers {
        let registry = registry.clone();
        fillers.push(tokio::task::spawn_blocking(move || {
            fill_worker(&registry, worker, &opts)
        }));
    }

    let mut on_disk = Vec::new();
    for filler in fillers {
        on_disk.extend(filler.await.context("fill worker panicked")??);
    }
    info!(evicted = on_disk.len(), "fill phase done");

    let evicted_to_disk = on_disk.len();
    let mut verifiers = Vec::with_capacity(opts.workers);
    for chunk in on_disk.chunks(on_disk.len().div_ceil(opts.workers).max(1)) {
        let registry = registry.clone();
        let chunk = chunk.to_vec();
        verifiers.push(tokio::task::spawn_blocking(move || {
            verify_worker(&registry, &chunk)
        }));
    }

    let mut verified = 0;
    for verifier in verifiers {
        verified += verifier.await.context("verify worker panicked")??;
    }

    let report = StressReport {
        entries: opts.entries,
        workers: opts.workers,
        cost: opts.cost,
        evicted_to_disk,
        verified,
        elapsed_ms: started.elapsed().as_millis(),
        registry: registry.stats(),
        usage: usage.snapshot(),
    };

    if !keep {
        let removed = registry.clear()?;
        debug!(removed, "cleared registry");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// =============================================================================
// Purge
// =============================================================================

fn run_purge(cache_dir: &Path, dry_run: bool) -> anyhow::Result<()> {
    let files = layout::scan(cache_dir)
        .with_context(|| format!("failed to scan {}", cache_dir.display()))?;

    let mut removed = 0usize;
    let mut bytes = 0u64;
    for file in &files {
        if dry_run {
            println!("{}", file.path.display());
            continue;
        }
        match std::fs::remove_file(&file.path) {
            Ok(()) => {
                removed += 1;
                bytes += file.size;
            }
            Err(e) => warn!(path = %file.path.display(), error = %e, "failed to delete cache file"),
        }
    }

    if !dry_run {
        // Bucket directories left empty are removed; non-empty ones fail silently
        for file in &files {
            if let Some(bucket) = file.path.parent() {
                let _ = std::fs::remove_dir(bucket);
            }
        }
        info!(removed, bytes, "purged cache files");
    }

    println!(
        "{} {} files ({} bytes)",
        if dry_run { "would delete" } else { "deleted" },
        if dry_run { files.len() } else { removed },
        if dry_run { files.iter().map(|f| f.size).sum() } else { bytes }
    );
    Ok(())
}
