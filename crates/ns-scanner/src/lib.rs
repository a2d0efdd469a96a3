//! Parallel sentinel-byte counting over files and directories.
//!
//! This crate is the engine behind the `nullscan` command. It splits each file
//! into fixed-size chunks, counts a sentinel byte in every chunk on a pool of
//! long-lived worker threads, and sums the partial counts per file.
//!
//! # Overview
//!
//! The main entry point is [`Scanner`], which combines:
//!
//! - [`TargetResolver`]: turns command-line targets into file paths
//! - [`ScanCoordinator`]: streams one file at a time through the pool
//! - [`WorkerPool`]: persistent counting workers fed by a bounded queue
//! - [`ChunkReader`]: lazy fixed-size chunking of a file
//! - [`ScanStats`]: atomic run statistics
//!
//! # Example
//!
//! ```no_run
//! use camino::Utf8PathBuf;
//! use ns_core::ScanConfig;
//! use ns_scanner::Scanner;
//!
//! let scanner = Scanner::new(ScanConfig::default())?;
//! let report = scanner.scan_targets(&[Utf8PathBuf::from("./images")]);
//!
//! for file in &report.files {
//!     match &file.outcome {
//!         Ok(count) => println!("{}: {count}", file.path),
//!         Err(_) => println!("{}: Error", file.path),
//!     }
//! }
//! # Ok::<(), ns_scanner::ScanError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! Scanner (run facade)
//!     │
//!     ├── TargetResolver (one directory level at a time)
//!     │       │
//!     │       └── WalkBuilder (ignore crate, depth 1)
//!     │
//!     ├── ScanCoordinator (one file at a time)
//!     │       │
//!     │       ├── ChunkReader ──► work queue (bounded) ──► WorkerPool
//!     │       │                                              │
//!     │       └── ScanTicket barrier ◄── result queue ◄──────┘
//!     │
//!     └── ScanStats (atomic counters)
//! ```
//!
//! # Performance
//!
//! - **Memory**: at most `2 × workers + 1` chunks alive at once, whatever the
//!   file size
//! - **CPU**: chunks of one file are counted on every worker in parallel
//! - **Threads**: spawned once per [`Scanner`], reused for every file

#![deny(clippy::all)]
#![warn(missing_docs)]

mod chunk;
mod coordinator;
mod error;
mod pool;
mod resolver;
mod stats;

pub use chunk::{Chunk, ChunkReader, count_sentinel};
pub use coordinator::{FileScan, ScanCoordinator};
pub use error::ScanError;
pub use pool::{
    ChunkCounter, ChunkFault, PartialCount, PoolSnapshot, PoolStats, ScanTicket, SentinelCounter,
    WorkItem, WorkerPool,
};
pub use resolver::{ResolvedTarget, TargetResolver};
pub use stats::{ScanStats, StatsSnapshot};

use camino::{Utf8Path, Utf8PathBuf};
use ns_core::ScanConfig;
use tracing::{debug, info, warn};

/// Outcome of scanning one file.
#[derive(Debug)]
pub struct FileReport {
    /// Absolute path of the file (or of the directory that failed to list).
    pub path: Utf8PathBuf,
    /// Sentinel count, or why there is none.
    pub outcome: Result<u64, ScanError>,
}

impl FileReport {
    /// Returns the count if the file was scanned successfully.
    #[inline]
    #[must_use]
    pub fn count(&self) -> Option<u64> {
        self.outcome.as_ref().ok().copied()
    }
}

/// Result of a run over a set of targets.
#[derive(Debug)]
pub struct ScanReport {
    /// One entry per file, in scan order.
    pub files: Vec<FileReport>,
    /// Statistics snapshot taken when the run finished.
    pub stats: StatsSnapshot,
}

impl ScanReport {
    /// Returns `true` if every file produced a count.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.files.iter().all(|f| f.outcome.is_ok())
    }

    /// Iterates over the files that failed.
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.outcome.is_err())
    }
}

/// Scans targets file by file on a shared worker pool.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use ns_core::ScanConfig;
/// use ns_scanner::Scanner;
///
/// let scanner = Scanner::new(ScanConfig { sentinel_byte: 0xFF, ..ScanConfig::default() })?;
/// let count = scanner.scan_file(Utf8Path::new("flash.bin"))?;
/// println!("{count} erased bytes");
/// # Ok::<(), ns_scanner::ScanError>(())
/// ```
#[derive(Debug)]
pub struct Scanner {
    config: ScanConfig,
    resolver: TargetResolver,
    coordinator: ScanCoordinator,
    stats: ScanStats,
}

impl Scanner {
    /// Creates a scanner and starts its worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] if the configuration is invalid and
    /// [`ScanError::WorkerSpawn`] if the pool cannot be started.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        let coordinator = ScanCoordinator::new(&config)?;
        Ok(Self::with_coordinator(config, coordinator))
    }

    /// Creates a scanner around an existing coordinator.
    #[must_use]
    pub fn with_coordinator(config: ScanConfig, coordinator: ScanCoordinator) -> Self {
        Self {
            config,
            resolver: TargetResolver::new().with_follow_links(config.follow_links),
            coordinator,
            stats: ScanStats::new(),
        }
    }

    /// Resolves `targets` and scans every file found, one after another.
    ///
    /// Failures are recorded per file; the run never stops early. Statistics
    /// are reset at the start of each run.
    pub fn scan_targets(&self, targets: &[Utf8PathBuf]) -> ScanReport {
        info!(
            targets = targets.len(),
            recursive = self.config.recursive,
            workers = self.coordinator.worker_count(),
            "Starting scan"
        );
        self.stats.reset();

        let mut files = Vec::new();
        for resolved in self.resolver.expand(targets, self.config.recursive) {
            let report = match resolved {
                Ok(path) => {
                    let outcome = self.scan_file(&path);
                    FileReport { path, outcome }
                }
                Err(e) => {
                    self.stats.record_failure();
                    FileReport {
                        path: failed_path(&e),
                        outcome: Err(e),
                    }
                }
            };
            files.push(report);
        }

        let stats = self.stats.snapshot();
        info!(
            files = stats.files_scanned,
            failed = stats.files_failed,
            bytes = stats.bytes_scanned,
            sentinels = stats.sentinels_found,
            "Scan completed"
        );

        ScanReport { files, stats }
    }

    /// Scans a single file and records the outcome in the run statistics.
    ///
    /// # Errors
    ///
    /// See [`ScanCoordinator::scan`].
    pub fn scan_file(&self, path: &Utf8Path) -> Result<u64, ScanError> {
        match self.coordinator.scan_detailed(path) {
            Ok(FileScan { sentinels, bytes }) => {
                self.stats.record_success(bytes, sentinels);
                debug!(path = %path, count = sentinels, bytes, "Counted file");
                Ok(sentinels)
            }
            Err(e) => {
                self.stats.record_failure();
                warn!(path = %path, error = %e, "Failed to scan file");
                Err(e)
            }
        }
    }

    /// Returns the current run statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the scanner configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Returns the underlying coordinator.
    #[inline]
    #[must_use]
    pub const fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    /// Stops the worker pool. Returns the number of workers that panicked.
    pub fn shutdown(self) -> usize {
        self.coordinator.shutdown()
    }
}

/// Best-effort path for a resolver failure.
fn failed_path(err: &ScanError) -> Utf8PathBuf {
    match err {
        ScanError::NonUtf8Path(path) => Utf8PathBuf::from(path.to_string_lossy().into_owned()),
        other => other.path().cloned().unwrap_or_default(),
    }
}
