//! Lock-free pipeline counters and the capped error sample.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Number of failures echoed in the end-of-run summary.
pub const ERROR_SAMPLE_SIZE: usize = 10;

/// Counters shared by every stage. Safe to poll at any time.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub active: AtomicBool,
    /// Items handed to the work queue
    pub dispatched: AtomicUsize,
    /// Items turned into a record and handed to the writer
    pub succeeded: AtomicUsize,
    /// Items skipped because a transformation or lookup failed
    pub failed: AtomicUsize,
    /// succeeded + failed, bumped once per item
    pub processed: AtomicUsize,
    pub batches_flushed: AtomicUsize,
    pub rows_written: AtomicU64,
    /// Records the store already had (conflict-skipped)
    pub duplicates_skipped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.active.store(true, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.batches_flushed.store(0, Ordering::Relaxed);
        self.rows_written.store(0, Ordering::Relaxed);
        self.duplicates_skipped.store(0, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, records: usize, inserted: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(inserted, Ordering::Relaxed);
        self.duplicates_skipped
            .fetch_add((records as u64).saturating_sub(inserted), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active: bool,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub processed: usize,
    pub batches_flushed: usize,
    pub rows_written: u64,
    pub duplicates_skipped: u64,
}

/// One skipped item: which worker, which poem, why.
#[derive(Debug)]
pub struct ErrorRecord {
    pub worker_id: usize,
    pub item: String,
    pub cause: anyhow::Error,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}: {}: {:#}", self.worker_id, self.item, self.cause)
    }
}

/// Log a progress line every `interval` until `cancel` fires.
pub fn spawn_progress_logger(
    stats: Arc<PipelineStats>,
    total: usize,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let s = stats.snapshot();
                    let pct = if total > 0 { s.processed * 100 / total } else { 100 };
                    tracing::info!(
                        processed = s.processed,
                        total,
                        failed = s.failed,
                        batches = s.batches_flushed,
                        written = s.rows_written,
                        "Progress: {}/{} ({}%)",
                        s.processed,
                        total,
                        pct
                    );
                }
            }
        }
    })
}
