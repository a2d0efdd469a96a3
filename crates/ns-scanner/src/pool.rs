//! Persistent pool of counting workers.
//!
//! Each worker is a named OS thread that loops over a shared work queue:
//!
//! 1. Block until a [`WorkItem`] arrives
//! 2. Count the sentinel byte in its chunk (skipped if the scan was cancelled)
//! 3. Push a [`PartialCount`] tagged with the scan id onto the result queue
//! 4. Acknowledge the item on its [`ScanTicket`]
//!
//! Step 4 runs from a drop guard, so the per-scan barrier is released even if
//! counting panics. A panic inside the counter is caught and reported as a
//! [`ChunkFault`] instead of tearing the worker down.
//!
//! Workers exit when the work queue is closed. Dropping a [`WorkerPool`]
//! detaches its threads; they never hold the process open.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::chunk::{Chunk, count_sentinel};
use crate::error::ScanError;

/// Counts something in a chunk of bytes.
///
/// Implementations must be cheap to share between threads; one instance is
/// used by every worker in the pool.
pub trait ChunkCounter: Send + Sync {
    /// Returns the number of matching bytes in `chunk`.
    fn count(&self, chunk: &[u8]) -> u64;
}

/// Counts occurrences of a single sentinel byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelCounter {
    sentinel: u8,
}

impl SentinelCounter {
    /// Creates a counter for `sentinel`.
    #[inline]
    #[must_use]
    pub const fn new(sentinel: u8) -> Self {
        Self { sentinel }
    }

    /// Returns the byte being counted.
    #[inline]
    #[must_use]
    pub const fn sentinel(&self) -> u8 {
        self.sentinel
    }
}

impl ChunkCounter for SentinelCounter {
    #[inline]
    fn count(&self, chunk: &[u8]) -> u64 {
        count_sentinel(chunk, self.sentinel)
    }
}

/// Completion barrier for a single scan call.
///
/// Tracks how many submitted chunks are still outstanding. The coordinator
/// calls [`submit`](Self::submit) before enqueueing each chunk and workers
/// call [`complete`](Self::complete) after pushing its result, so once
/// [`wait`](Self::wait) returns every result for this scan is already on the
/// result queue.
#[derive(Debug)]
pub struct ScanTicket {
    id: u64,
    outstanding: Mutex<u64>,
    drained: Condvar,
    cancelled: AtomicBool,
}

impl ScanTicket {
    /// Creates a ticket with no outstanding work.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the scan id results are tagged with.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Records one more chunk in flight.
    pub fn submit(&self) {
        *self.outstanding.lock() += 1;
    }

    /// Acknowledges one chunk, waking waiters when none remain.
    pub fn complete(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.drained.notify_all();
        }
    }

    /// Returns the number of chunks not yet acknowledged.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        *self.outstanding.lock()
    }

    /// Blocks until every submitted chunk has been acknowledged.
    ///
    /// Returns immediately when nothing was submitted.
    pub fn wait(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.drained.wait(&mut outstanding);
        }
    }

    /// Like [`wait`](Self::wait), but gives up at `deadline`.
    ///
    /// Returns `true` if the barrier was released.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            if self.drained.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }

    /// Marks the scan as abandoned. Workers acknowledge its remaining chunks
    /// without counting them.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A chunk in transit to the workers, bound to the scan that produced it.
#[derive(Debug)]
pub struct WorkItem {
    ticket: Arc<ScanTicket>,
    chunk: Chunk,
}

impl WorkItem {
    /// Wraps `chunk` for the scan owning `ticket`.
    #[must_use]
    pub const fn new(ticket: Arc<ScanTicket>, chunk: Chunk) -> Self {
        Self { ticket, chunk }
    }
}

/// A chunk whose count could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chunk count failed: {message}")]
pub struct ChunkFault {
    /// Description of the failure, taken from the panic payload when possible.
    pub message: String,
}

impl ChunkFault {
    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_owned());
        Self { message }
    }
}

/// Result of counting one [`WorkItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCount {
    /// Id of the scan the chunk belonged to.
    pub scan_id: u64,
    /// The chunk's sentinel count, or the fault that prevented it.
    pub outcome: Result<u64, ChunkFault>,
}

/// Atomic counters describing pool activity over the whole run.
#[derive(Debug, Default)]
pub struct PoolStats {
    chunks: AtomicU64,
    bytes: AtomicU64,
    faults: AtomicU64,
    skipped: AtomicU64,
}

impl PoolStats {
    fn record_chunk(&self, bytes: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Chunks counted successfully.
    pub chunks: u64,
    /// Bytes in successfully counted chunks.
    pub bytes: u64,
    /// Chunks whose count panicked.
    pub faults: u64,
    /// Chunks acknowledged without counting because their scan was cancelled.
    pub skipped: u64,
}

/// Acknowledges a work item when dropped.
struct Completion<'a>(&'a ScanTicket);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// A fixed set of long-lived counting workers.
///
/// The pool does not own the work queue's sender. Close the queue (drop every
/// sender) before calling [`shutdown`](Self::shutdown), otherwise the join
/// blocks forever.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers consuming `work_rx` and producing into
    /// `result_tx`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::WorkerSpawn`] if the OS refuses to create a thread.
    /// Workers spawned before the failure exit once the caller drops the
    /// work queue.
    pub fn spawn(
        worker_count: usize,
        work_rx: &Receiver<WorkItem>,
        result_tx: &Sender<PartialCount>,
        counter: &Arc<dyn ChunkCounter>,
    ) -> Result<Self, ScanError> {
        let stats = Arc::new(PoolStats::default());
        let mut workers = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let counter = Arc::clone(counter);
            let stats = Arc::clone(&stats);

            let handle = thread::Builder::new()
                .name(format!("nullscan-worker-{id}"))
                .spawn(move || worker_loop(id, &work_rx, &result_tx, counter.as_ref(), &stats))
                .map_err(|source| ScanError::WorkerSpawn { id, source })?;
            workers.push(handle);
        }

        debug!(workers = worker_count, "Worker pool started");
        Ok(Self { workers, stats })
    }

    /// Returns the number of workers in the pool.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns the pool's activity counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Joins every worker. Returns how many of them panicked.
    pub fn shutdown(self) -> usize {
        let mut panicked = 0;
        for handle in self.workers {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        debug!(panicked, "Worker pool stopped");
        panicked
    }
}

fn worker_loop(
    id: usize,
    work_rx: &Receiver<WorkItem>,
    result_tx: &Sender<PartialCount>,
    counter: &dyn ChunkCounter,
    stats: &PoolStats,
) {
    trace!(worker = id, "Worker starting");

    while let Ok(item) = work_rx.recv() {
        let _completion = Completion(&item.ticket);
        let scan_id = item.ticket.id();

        if item.ticket.is_cancelled() {
            stats.record_skip();
            trace!(worker = id, scan_id, "Skipping chunk of cancelled scan");
            continue;
        }

        let bytes = item.chunk.as_bytes();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| counter.count(bytes)))
            .map_err(|payload| ChunkFault::from_panic(payload.as_ref()));

        match &outcome {
            Ok(count) => {
                stats.record_chunk(bytes.len());
                trace!(worker = id, scan_id, len = bytes.len(), count, "Chunk counted");
            }
            Err(fault) => {
                stats.record_fault();
                warn!(worker = id, scan_id, error = %fault, "Chunk count failed");
            }
        }

        if result_tx.send(PartialCount { scan_id, outcome }).is_err() {
            // Coordinator is gone; nothing left to report to.
            break;
        }
    }

    trace!(worker = id, "Worker exiting");
}
