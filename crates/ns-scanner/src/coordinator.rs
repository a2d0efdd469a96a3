//! Per-file scan orchestration.
//!
//! [`ScanCoordinator`] owns the worker pool and the two queues connecting it
//! to the caller. A call to [`ScanCoordinator::scan`] streams one file
//! through the pool:
//!
//! 1. Open the file and split it into chunks
//! 2. Submit every chunk on a fresh [`ScanTicket`]
//! 3. Wait on the ticket until every chunk has been acknowledged
//! 4. Drain exactly the results tagged with this scan's id and sum them
//!
//! Scans are serialized: concurrent callers queue on an internal lock, so
//! results of two files never mix. Results left behind by an abandoned scan
//! carry an older id and are dropped during a later drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use ns_core::ScanConfig;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::chunk::{Chunk, ChunkReader};
use crate::error::ScanError;
use crate::pool::{
    ChunkCounter, PartialCount, PoolStats, ScanTicket, SentinelCounter, WorkItem, WorkerPool,
};

/// Why a chunk could not be handed to the pool.
enum SubmitFailure {
    DeadlineExpired,
    PoolClosed,
}

/// Sum of the results drained for one scan.
#[derive(Debug, Default)]
struct Tally {
    sentinels: u64,
    faults: u64,
}

/// Totals for one successfully scanned file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileScan {
    /// Occurrences of the sentinel byte.
    pub sentinels: u64,
    /// Bytes read from the file and counted.
    pub bytes: u64,
}

/// Streams files through a persistent [`WorkerPool`] and sums their counts.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use ns_core::ScanConfig;
/// use ns_scanner::ScanCoordinator;
///
/// let coordinator = ScanCoordinator::new(&ScanConfig::default())?;
/// let zeros = coordinator.scan(Utf8Path::new("disk.img"))?;
/// println!("{zeros} zero bytes");
/// # Ok::<(), ns_scanner::ScanError>(())
/// ```
#[derive(Debug)]
pub struct ScanCoordinator {
    work_tx: Sender<WorkItem>,
    result_rx: Receiver<PartialCount>,
    pool: WorkerPool,
    sentinel: u8,
    chunk_size: usize,
    timeout: Option<Duration>,
    next_scan_id: AtomicU64,
    scan_lock: Mutex<()>,
}

impl ScanCoordinator {
    /// Validates `config` and starts the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] for an invalid configuration and
    /// [`ScanError::WorkerSpawn`] if a worker thread cannot be started.
    pub fn new(config: &ScanConfig) -> Result<Self, ScanError> {
        let counter: Arc<dyn ChunkCounter> = Arc::new(SentinelCounter::new(config.sentinel_byte));
        Self::with_counter(config, counter)
    }

    /// Like [`new`](Self::new), but counts with a custom [`ChunkCounter`].
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_counter(
        config: &ScanConfig,
        counter: Arc<dyn ChunkCounter>,
    ) -> Result<Self, ScanError> {
        config.validate()?;

        let worker_count = config.effective_worker_count();
        // Bounded so at most `worker_count` chunks wait in the queue.
        let (work_tx, work_rx) = crossbeam_channel::bounded(worker_count);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        // The pool clones what it needs; dropping our ends here lets channel
        // disconnection track worker liveness.
        let pool = WorkerPool::spawn(worker_count, &work_rx, &result_tx, &counter)?;

        debug!(
            workers = worker_count,
            chunk_size = config.chunk_size_bytes,
            sentinel = config.sentinel_byte,
            "Scan coordinator ready"
        );

        Ok(Self {
            work_tx,
            result_rx,
            pool,
            sentinel: config.sentinel_byte,
            chunk_size: config.chunk_size_bytes,
            timeout: config.scan_timeout(),
            next_scan_id: AtomicU64::new(0),
            scan_lock: Mutex::new(()),
        })
    }

    /// Counts occurrences of the sentinel byte in the file at `path`.
    ///
    /// An empty file yields `Ok(0)` without touching the pool.
    ///
    /// # Errors
    ///
    /// - [`ScanError::Unreadable`] if the file cannot be opened or a read
    ///   fails part way through
    /// - [`ScanError::WorkerFault`] if any chunk could not be counted
    /// - [`ScanError::Incomplete`] if the configured deadline expires
    /// - [`ScanError::PoolClosed`] if the workers are gone
    pub fn scan(&self, path: &Utf8Path) -> Result<u64, ScanError> {
        self.scan_detailed(path).map(|scan| scan.sentinels)
    }

    /// Like [`scan`](Self::scan), but also reports how many bytes were read.
    ///
    /// The byte total is what the chunk reader actually delivered, so it
    /// matches the counted data even if the file changes size mid-scan.
    ///
    /// # Errors
    ///
    /// Same as [`scan`](Self::scan).
    pub fn scan_detailed(&self, path: &Utf8Path) -> Result<FileScan, ScanError> {
        let _serial = self.scan_lock.lock();

        let reader =
            ChunkReader::open(path, self.chunk_size).map_err(|e| ScanError::unreadable(path, e))?;

        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);
        let ticket = Arc::new(ScanTicket::new(
            self.next_scan_id.fetch_add(1, Ordering::Relaxed),
        ));
        debug!(path = %path, scan_id = ticket.id(), "Scanning file");

        let mut submitted: u64 = 0;
        let mut bytes: u64 = 0;
        let mut read_error = None;

        for chunk in reader {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };

            let len = chunk.len() as u64;
            match self.submit(&ticket, chunk, deadline) {
                Ok(()) => {
                    submitted += 1;
                    bytes += len;
                }
                Err(SubmitFailure::DeadlineExpired) => {
                    ticket.cancel();
                    return Err(self.incomplete(path, &ticket));
                }
                Err(SubmitFailure::PoolClosed) => {
                    ticket.cancel();
                    return Err(ScanError::PoolClosed);
                }
            }
        }

        let released = match deadline {
            Some(deadline) => ticket.wait_until(deadline),
            None => {
                ticket.wait();
                true
            }
        };

        if !released {
            ticket.cancel();
            if let Some(source) = read_error {
                return Err(ScanError::unreadable(path, source));
            }
            return Err(self.incomplete(path, &ticket));
        }

        let tally = self.drain(&ticket, submitted)?;

        if let Some(source) = read_error {
            warn!(path = %path, submitted, error = %source, "Read failed mid-file, discarding counts");
            return Err(ScanError::unreadable(path, source));
        }

        if tally.faults > 0 {
            warn!(path = %path, faulted_chunks = tally.faults, "Chunk counts failed");
            return Err(ScanError::WorkerFault {
                path: path.to_owned(),
                faulted_chunks: tally.faults,
            });
        }

        debug!(
            path = %path,
            chunks = submitted,
            bytes,
            count = tally.sentinels,
            elapsed_ms = started.elapsed().as_millis(),
            "File scanned"
        );
        Ok(FileScan {
            sentinels: tally.sentinels,
            bytes,
        })
    }

    fn submit(
        &self,
        ticket: &Arc<ScanTicket>,
        chunk: Chunk,
        deadline: Option<Instant>,
    ) -> Result<(), SubmitFailure> {
        // Register before sending so a fast worker can never acknowledge an
        // item the ticket does not know about yet.
        ticket.submit();
        let item = WorkItem::new(Arc::clone(ticket), chunk);

        let sent = match deadline {
            Some(deadline) => self
                .work_tx
                .send_deadline(item, deadline)
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => SubmitFailure::DeadlineExpired,
                    SendTimeoutError::Disconnected(_) => SubmitFailure::PoolClosed,
                }),
            None => self
                .work_tx
                .send(item)
                .map_err(|_| SubmitFailure::PoolClosed),
        };

        if sent.is_err() {
            ticket.complete();
        }
        sent
    }

    /// Collects exactly `expected` results for `ticket`, discarding any left
    /// over from earlier scans.
    fn drain(&self, ticket: &ScanTicket, expected: u64) -> Result<Tally, ScanError> {
        let mut tally = Tally::default();
        let mut received = 0;

        while received < expected {
            let partial = self.result_rx.recv().map_err(|_| ScanError::PoolClosed)?;
            if partial.scan_id != ticket.id() {
                trace!(stale = partial.scan_id, current = ticket.id(), "Discarding stale result");
                continue;
            }

            received += 1;
            match partial.outcome {
                Ok(count) => tally.sentinels += count,
                Err(_) => tally.faults += 1,
            }
        }

        Ok(tally)
    }

    fn incomplete(&self, path: &Utf8Path, ticket: &ScanTicket) -> ScanError {
        let timeout = self.timeout.unwrap_or_default();
        warn!(
            path = %path,
            scan_id = ticket.id(),
            outstanding = ticket.outstanding(),
            timeout_ms = timeout.as_millis(),
            "Scan deadline expired"
        );
        ScanError::Incomplete {
            path: path.to_owned(),
            timeout,
        }
    }

    /// Returns the number of workers in the pool.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Returns the configured chunk size in bytes.
    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the byte being counted.
    #[inline]
    #[must_use]
    pub const fn sentinel(&self) -> u8 {
        self.sentinel
    }

    /// Returns the pool's activity counters.
    #[inline]
    #[must_use]
    pub fn pool_stats(&self) -> &PoolStats {
        self.pool.stats()
    }

    /// Closes the work queue and joins every worker.
    ///
    /// Returns the number of workers that panicked.
    pub fn shutdown(self) -> usize {
        let Self { work_tx, pool, .. } = self;
        drop(work_tx);
        pool.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn config(workers: usize, chunk_size: usize) -> ScanConfig {
        ScanConfig {
            worker_count: Some(workers),
            chunk_size_bytes: chunk_size,
            ..ScanConfig::default()
        }
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    /// Panics on any chunk containing `!`.
    struct Brittle;

    impl ChunkCounter for Brittle {
        fn count(&self, chunk: &[u8]) -> u64 {
            assert!(!chunk.contains(&b'!'), "brittle counter hit a bang");
            crate::count_sentinel(chunk, 0)
        }
    }

    /// Sleeps on chunks starting with `S`.
    struct Sluggish;

    impl ChunkCounter for Sluggish {
        fn count(&self, chunk: &[u8]) -> u64 {
            if chunk.first() == Some(&b'S') {
                thread::sleep(Duration::from_millis(300));
            }
            crate::count_sentinel(chunk, 0)
        }
    }

    #[test]
    fn test_empty_file_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "empty", b"");
        let coordinator = ScanCoordinator::new(&config(2, 4)).unwrap();

        assert_eq!(coordinator.scan(&path).unwrap(), 0);
        assert_eq!(coordinator.pool_stats().snapshot().chunks, 0);
    }

    #[test]
    fn test_counts_across_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "mixed", b"\0\0ab\0cd\0\0\0e");
        let coordinator = ScanCoordinator::new(&config(3, 4)).unwrap();

        assert_eq!(coordinator.scan(&path).unwrap(), 6);
        assert_eq!(coordinator.pool_stats().snapshot().chunks, 3);
    }

    #[test]
    fn test_scan_detailed_reports_bytes_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "mixed", b"\0\0ab\0cd\0\0\0e");
        let empty = write(&dir, "empty", b"");
        let coordinator = ScanCoordinator::new(&config(2, 4)).unwrap();

        assert_eq!(
            coordinator.scan_detailed(&path).unwrap(),
            FileScan {
                sentinels: 6,
                bytes: 11,
            }
        );
        assert_eq!(coordinator.scan_detailed(&empty).unwrap(), FileScan::default());
    }

    #[test]
    fn test_custom_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "ff", &[0xFF, 0x00, 0xFF, 0xFF]);
        let coordinator = ScanCoordinator::new(&ScanConfig {
            sentinel_byte: 0xFF,
            ..config(1, 2)
        })
        .unwrap();

        assert_eq!(coordinator.sentinel(), 0xFF);
        assert_eq!(coordinator.scan(&path).unwrap(), 3);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent")).unwrap();
        let coordinator = ScanCoordinator::new(&config(2, 4)).unwrap();

        let err = coordinator.scan(&path).unwrap_err();
        assert!(matches!(err, ScanError::Unreadable { .. }));

        // The pool is still usable afterwards.
        let ok = write(&dir, "ok", b"\0");
        assert_eq!(coordinator.scan(&ok).unwrap(), 1);
    }

    #[test]
    fn test_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        let coordinator = ScanCoordinator::new(&config(1, 4)).unwrap();

        let err = coordinator.scan(&path).unwrap_err();
        assert!(matches!(err, ScanError::Unreadable { .. }));
    }

    #[test]
    fn test_worker_fault_is_isolated_to_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write(&dir, "bad", b"\0\0\0\0!\0\0\0\0\0\0\0");
        let good = write(&dir, "good", b"\0\0\0\0\0\0\0\0");
        let coordinator = ScanCoordinator::with_counter(&config(2, 4), Arc::new(Brittle)).unwrap();

        let err = coordinator.scan(&bad).unwrap_err();
        assert!(matches!(
            err,
            ScanError::WorkerFault {
                faulted_chunks: 1,
                ..
            }
        ));
        assert_eq!(coordinator.scan(&good).unwrap(), 8);
        assert_eq!(coordinator.pool_stats().snapshot().faults, 1);
    }

    #[test]
    fn test_deadline_abandons_scan_without_leaking_results() {
        let dir = tempfile::tempdir().unwrap();
        let slow = write(&dir, "slow", &[b'S'; 16]);
        let fast = write(&dir, "fast", &[0u8; 16]);
        let coordinator = ScanCoordinator::with_counter(
            &ScanConfig {
                scan_timeout_ms: Some(50),
                ..config(1, 4)
            },
            Arc::new(Sluggish),
        )
        .unwrap();

        let err = coordinator.scan(&slow).unwrap_err();
        assert!(matches!(err, ScanError::Incomplete { .. }));

        // The abandoned scan's chunks may still be in flight; none of them
        // may be counted towards the next file.
        let coordinator = ScanCoordinator {
            timeout: None,
            ..coordinator
        };
        assert_eq!(coordinator.scan(&fast).unwrap(), 16);
    }

    #[test]
    fn test_repeated_scans_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(&dir, "a", &[0u8; 10]);
        let b = write(&dir, "b", b"\0x\0");
        let coordinator = ScanCoordinator::new(&config(2, 3)).unwrap();

        let first = (coordinator.scan(&a).unwrap(), coordinator.scan(&b).unwrap());
        let second = (coordinator.scan(&b).unwrap(), coordinator.scan(&a).unwrap());
        assert_eq!(first, (10, 2));
        assert_eq!(second, (2, 10));
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(&dir, "a", &[0u8; 1000]);
        let b = write(&dir, "b", &[0u8; 7]);
        let coordinator = Arc::new(ScanCoordinator::new(&config(2, 16)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let path = if i % 2 == 0 { a.clone() } else { b.clone() };
                thread::spawn(move || coordinator.scan(&path).unwrap())
            })
            .collect();

        let counts: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(counts, vec![1000, 7, 1000, 7]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ScanCoordinator::new(&config(0, 4)).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn test_accessors_and_shutdown() {
        let coordinator = ScanCoordinator::new(&config(3, 64)).unwrap();
        assert_eq!(coordinator.worker_count(), 3);
        assert_eq!(coordinator.chunk_size(), 64);
        assert_eq!(coordinator.sentinel(), 0);
        assert_eq!(coordinator.shutdown(), 0);
    }
}
