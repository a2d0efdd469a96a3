//! Run statistics with atomic counters.
//!
//! [`ScanStats`] accumulates totals while a run is in progress and
//! [`StatsSnapshot`] is the copyable view handed to reports.
//!
//! Counters use [`Relaxed`](std::sync::atomic::Ordering::Relaxed) ordering;
//! they are informational and never used for synchronization.
//!
//! # Examples
//!
//! ```
//! use ns_scanner::ScanStats;
//!
//! let stats = ScanStats::new();
//! stats.record_success(4096, 12);
//! stats.record_failure();
//!
//! let snap = stats.snapshot();
//! assert_eq!(snap.files_scanned, 1);
//! assert_eq!(snap.files_failed, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters for a scan run.
#[derive(Debug, Default)]
pub struct ScanStats {
    files_scanned: AtomicU64,
    files_failed: AtomicU64,
    bytes_scanned: AtomicU64,
    sentinels_found: AtomicU64,
}

impl ScanStats {
    /// Creates a new [`ScanStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a file that produced a count.
    #[inline]
    pub fn record_success(&self, bytes: u64, sentinels: u64) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
        self.sentinels_found.fetch_add(sentinels, Ordering::Relaxed);
    }

    /// Records a file that could not be scanned.
    #[inline]
    pub fn record_failure(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            sentinels_found: self.sentinels_found.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.files_scanned.store(0, Ordering::Relaxed);
        self.files_failed.store(0, Ordering::Relaxed);
        self.bytes_scanned.store(0, Ordering::Relaxed);
        self.sentinels_found.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`ScanStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Files that produced a count.
    pub files_scanned: u64,
    /// Files reported as errors.
    pub files_failed: u64,
    /// Bytes read from successfully scanned files.
    pub bytes_scanned: u64,
    /// Sentinel bytes found across successfully scanned files.
    pub sentinels_found: u64,
}

impl StatsSnapshot {
    /// Returns the number of files attempted.
    #[inline]
    #[must_use]
    pub const fn total_files(&self) -> u64 {
        self.files_scanned + self.files_failed
    }

    /// Returns the share of attempted files that produced a count, as a
    /// percentage. Returns 100.0 when nothing was attempted.
    ///
    /// # Examples
    ///
    /// ```
    /// use ns_scanner::StatsSnapshot;
    ///
    /// let snap = StatsSnapshot {
    ///     files_scanned: 3,
    ///     files_failed: 1,
    ///     ..StatsSnapshot::default()
    /// };
    /// assert!((snap.success_rate() - 75.0).abs() < 0.1);
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Acceptable for statistics display
    pub fn success_rate(&self) -> f64 {
        let total = self.total_files();
        if total == 0 {
            return 100.0;
        }

        (self.files_scanned as f64 / total as f64) * 100.0
    }
}
