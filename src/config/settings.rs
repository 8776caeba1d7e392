//! Engine configuration
//!
//! `EngineConfig` is the process-wide configuration record consumed by the
//! scheduler, listing scheduler, memory pool, and journal. It is an explicit
//! constructor parameter rather than a global, per the engine's "no hidden
//! singletons" design note.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 4 MiB, the fixed memory-pool cell size and the `SyncCopy` chunk size.
pub const CELL_SIZE_BYTES: u64 = 4 * 1024 * 1024;

/// Fraction of available physical memory the pool may claim by default.
pub const MEMORY_CACHE_MULTIPLIER: f64 = 0.5;

/// Memory pool ceiling on 64-bit targets.
#[cfg(target_pointer_width = "64")]
pub const MEMORY_CACHE_MAXIMUM_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Memory pool ceiling on 32-bit targets.
#[cfg(not(target_pointer_width = "64"))]
pub const MEMORY_CACHE_MAXIMUM_BYTES: u64 = 512 * 1024 * 1024;

/// Absolute cap on pool cells regardless of available memory.
pub const MEMORY_MANAGER_CELLS_MAXIMUM: usize = 8192;

/// Sliding checkpoint window size for a single-object transfer.
pub const MAX_COUNT_IN_TRANSFER_WINDOW: usize = 128;

/// `Monitor` poll back-off floor.
pub const COPY_STATUS_REFRESH_MIN_WAIT_MS: u64 = 100;

/// `Monitor` poll back-off ceiling.
pub const COPY_STATUS_REFRESH_MAX_WAIT_MS: u64 = 5_000;

/// Number of polls over which the back-off escalates from min to max.
pub const COPY_STATUS_REFRESH_MAX_REQUEST_COUNT: u32 = 100;

/// Remaining-bytes threshold below which the poll interval resets to the minimum.
pub const COPY_APPROACHING_FINISH_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;

/// Block blob limits: at most this many blocks of at most 100 MiB each.
pub const BLOCK_BLOB_MAX_BLOCKS: u64 = 50_000;
/// Maximum size of a single block blob block.
pub const BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Append blob limits: at most this many appends of at most 4 MiB each.
pub const APPEND_BLOB_MAX_BLOCKS: u64 = 50_000;
/// Maximum size of a single append blob append operation.
pub const APPEND_BLOB_MAX_BLOCK_SIZE_BYTES: u64 = CELL_SIZE_BYTES;

/// Below this size, a single `putBlock`+`commitBlockList` is skipped in favor
/// of one direct write.
pub const SINGLE_PUT_THRESHOLD_BYTES: u64 = 256 * 1024 * 1024;

/// Page-range scan span used when probing sparse page blobs.
pub const PAGE_RANGE_SCAN_SPAN_BYTES: u64 = 148 * 1024 * 1024;

/// SAS lifetime used for server-side copy source URIs.
pub const COPY_SAS_LIFETIME_MINUTES: u64 = 7 * 24 * 60;

/// Relative path length limit enforced before a transfer is enqueued.
pub const RELATIVE_PATH_LIMIT_CHARS: usize = 1024;

/// User-agent string presented by collaborators that speak the wire protocol.
pub const USER_AGENT: &str = concat!("DataMovement/", env!("CARGO_PKG_VERSION"));

/// Default directory-listing scheduler bound when neither endpoint is local.
pub const DEFAULT_LISTING_CONCURRENCY_REMOTE: usize = 6;

/// Default directory-listing scheduler bound when either endpoint is local.
pub const DEFAULT_LISTING_CONCURRENCY_LOCAL: usize = 4;

/// Process-wide engine configuration.
///
/// Constructed via `Default` and refined with builder-style setters, then
/// handed by reference to the scheduler, listing scheduler, memory pool, and
/// journal at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target concurrency of the data-transfer scheduler.
    pub parallel_operations: usize,
    /// Cap for the directory-listing scheduler.
    pub max_listing_concurrency: usize,
    /// Block blob chunk size; default 8 MiB, clamped to [4 MiB, 100 MiB].
    pub block_size: u64,
    /// Override for the computed memory-pool ceiling, in bytes.
    pub maximum_cache_size: Option<u64>,
    /// Per-RPC timeout override.
    pub update_service_timeout: std::time::Duration,
    /// Skip the journal's format-version compatibility check at open.
    pub disable_journal_validation: bool,
    /// Stall-detection window for the `Monitor` path (§9 open question).
    pub stall_window: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            parallel_operations: cpus * 2,
            max_listing_concurrency: DEFAULT_LISTING_CONCURRENCY_REMOTE,
            block_size: 8 * 1024 * 1024,
            maximum_cache_size: None,
            update_service_timeout: std::time::Duration::from_secs(100),
            disable_journal_validation: false,
            stall_window: std::time::Duration::from_millis(
                (3 * COPY_STATUS_REFRESH_MAX_WAIT_MS).max(30_000),
            ),
        }
    }
}

impl EngineConfig {
    /// Builder-style override for `parallel_operations`.
    pub fn with_parallel_operations(mut self, n: usize) -> Self {
        self.parallel_operations = n;
        self
    }

    /// Builder-style override for `max_listing_concurrency`.
    pub fn with_max_listing_concurrency(mut self, n: usize) -> Self {
        self.max_listing_concurrency = n;
        self
    }

    /// Builder-style override for `block_size`, clamped to the protocol's
    /// [4 MiB, 100 MiB] bounds.
    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes.clamp(CELL_SIZE_BYTES, BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES);
        self
    }

    /// Builder-style override for the memory-pool ceiling.
    pub fn with_maximum_cache_size(mut self, bytes: u64) -> Self {
        self.maximum_cache_size = Some(bytes);
        self
    }

    /// Set the directory-listing concurrency to the "either endpoint local"
    /// default, per §4.4.
    pub fn use_local_listing_default(mut self) -> Self {
        self.max_listing_concurrency = DEFAULT_LISTING_CONCURRENCY_LOCAL;
        self
    }
}

/// Minimal command-line surface for the demo binary.
///
/// The command-line front-end is out of scope for the engine itself; this
/// exists only so `src/main.rs` has something to parse when exercising the
/// library interactively. It intentionally does not expose every
/// `EngineConfig` knob.
#[derive(Parser, Debug)]
#[command(name = "dmcore-demo", about = "Demo driver for the data-movement engine")]
pub struct CliArgs {
    /// Source path (local file or directory).
    pub source: PathBuf,

    /// Destination path (local file or directory, backed by the in-memory
    /// blob store keyed by this path).
    pub destination: PathBuf,

    /// Treat source/destination as directories.
    #[arg(long)]
    pub directory: bool,

    /// Journal file used to persist and resume progress.
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Allow overwriting an existing destination.
    #[arg(long)]
    pub overwrite: bool,

    /// Target scheduler concurrency.
    #[arg(long)]
    pub parallel_operations: Option<usize>,

    /// Quiet mode: suppress progress output.
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Build an `EngineConfig` from the parsed arguments.
    pub fn engine_config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        if let Some(n) = self.parallel_operations {
            cfg = cfg.with_parallel_operations(n);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_respects_platform_ceiling() {
        let cfg = EngineConfig::default();
        assert!(cfg.parallel_operations >= 1);
        assert_eq!(cfg.stall_window, std::time::Duration::from_millis(30_000));
    }

    #[test]
    fn block_size_is_clamped() {
        let cfg = EngineConfig::default().with_block_size(1024);
        assert_eq!(cfg.block_size, CELL_SIZE_BYTES);

        let cfg = EngineConfig::default().with_block_size(u64::MAX);
        assert_eq!(cfg.block_size, BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES);
    }
}
