//! Concurrent ingestion pipeline.
//!
//! Stages: Dispatcher → Worker Pool → Aggregator (single writer)
//! Connected via bounded tokio::mpsc channels with backpressure. Workers
//! offload CPU-bound transformation to the blocking pool; the aggregator is
//! the only caller of the store's write path. A shared CancellationToken
//! stops every producer when the writer hits a fatal error.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::batching::{utilization, BatchSizer};
use super::progress::{ErrorRecord, PipelineStats, ERROR_SAMPLE_SIZE};
use super::transform::Transformer;
use crate::models::{Entity, ProcessedRecord, WorkItem};
use crate::resource_limits::{BatchBounds, ResourceProfile};
use crate::storage::{PoemStore, StorageError};

/// Rows per multi-row INSERT inside a flush.
const INSERT_ROWS_PER_STATEMENT: usize = 100;
/// Default records per write transaction; larger flushes span several.
pub const DEFAULT_TRANSACTION_SIZE: usize = 5000;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Batch write {batch} ({records} records) failed: {source}")]
    Flush {
        batch: usize,
        records: usize,
        #[source]
        source: StorageError,
    },
    #[error("{stage} task failed: {message}")]
    Task { stage: &'static str, message: String },
    #[error("{failed} of {total} items failed")]
    ItemFailures { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Outcome of one `process` call that reached the end without a fatal error.
#[derive(Debug)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub written: u64,
    pub duplicates: u64,
    /// Size of every flush in order; the last one may be a partial drain.
    pub batch_sizes: Vec<usize>,
    /// First failures, oldest first, capped at the error buffer size.
    pub errors: Vec<ErrorRecord>,
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Ingest {}: {} succeeded, {} failed of {} ({} written, {} duplicates, {} batches) in {:.1?}",
            self.run_id,
            self.succeeded,
            self.failed,
            self.dispatched,
            self.written,
            self.duplicates,
            self.batch_sizes.len(),
            self.elapsed
        );
        for e in self.errors.iter().take(ERROR_SAMPLE_SIZE) {
            tracing::warn!("  {}", e);
        }
        if self.failed > ERROR_SAMPLE_SIZE.min(self.errors.len()) {
            tracing::warn!(
                "  ... and {} more failures",
                self.failed - ERROR_SAMPLE_SIZE.min(self.errors.len())
            );
        }
    }

    /// Any failed item fails the run, however many records were committed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PipelineError::ItemFailures {
                failed: self.failed,
                total: self.dispatched,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs WorkItems through the pipeline into a [`PoemStore`].
pub struct Ingestor {
    store: Arc<dyn PoemStore>,
    transformer: Arc<Transformer>,
    profile: ResourceProfile,
    workers: usize,
    transaction_size: usize,
    stats: Arc<PipelineStats>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn PoemStore>, transformer: Transformer, profile: ResourceProfile) -> Self {
        Self {
            store,
            transformer: Arc::new(transformer),
            workers: profile.cpus.max(1),
            profile,
            transaction_size: DEFAULT_TRANSACTION_SIZE,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// Set the medium-pressure batch size. Ignored when `n <= 0`.
    pub fn set_batch_size(&mut self, n: i64) {
        if n <= 0 {
            tracing::debug!("Ignoring non-positive batch size {}", n);
            return;
        }
        self.profile.batch = self.profile.batch.with_default(n as usize);
    }

    pub fn set_workers(&mut self, n: usize) {
        if n > 0 {
            self.workers = n;
        }
    }

    pub fn set_transaction_size(&mut self, n: usize) {
        if n > 0 {
            self.transaction_size = n;
        }
    }

    pub fn batch_bounds(&self) -> BatchBounds {
        self.profile.batch
    }

    /// Shared counters, pollable while `process` runs.
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Ingest `items` under `run_id`. Per-item failures are counted and
    /// sampled in the report; a failed batch write aborts the run and is
    /// returned as the error. Batches committed before the failure stay
    /// committed.
    pub async fn process<I>(&self, run_id: Uuid, items: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = WorkItem>,
        I::IntoIter: Send + 'static,
    {
        let started = Instant::now();
        let profile = self.profile;
        self.stats.reset();

        tracing::info!(
            "Ingest {}: {} workers, queues work={} result={} errors={}, batch {}/{}/{}",
            run_id,
            self.workers,
            profile.work_queue,
            profile.result_queue,
            profile.error_buffer,
            profile.batch.min,
            profile.batch.default,
            profile.batch.max
        );

        let cancel = CancellationToken::new();

        // Bounded channels (backpressure)
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(profile.work_queue.max(1));
        let (result_tx, result_rx) = mpsc::channel::<ProcessedRecord>(profile.result_queue.max(1));
        let (error_tx, mut error_rx) = mpsc::channel::<ErrorRecord>(profile.error_buffer.max(1));

        // Shared receiver for workers
        let work_rx = Arc::new(Mutex::new(work_rx));

        // --- Spawn stages ---

        let h_dispatcher = tokio::spawn(dispatcher_stage(
            items.into_iter(),
            work_tx,
            self.stats.clone(),
            cancel.clone(),
        ));

        let mut h_workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let ctx = WorkerContext {
                worker_id,
                rx: work_rx.clone(),
                tx: result_tx.clone(),
                errors: error_tx.clone(),
                store: self.store.clone(),
                transformer: self.transformer.clone(),
                stats: self.stats.clone(),
                cancel: cancel.clone(),
            };
            h_workers.push(tokio::spawn(worker(ctx)));
        }
        // Only workers hold these now: the result queue closes when the
        // last worker exits.
        drop(work_rx);
        drop(result_tx);
        drop(error_tx);

        let writer = Aggregator {
            store: self.store.clone(),
            bounds: profile.batch,
            queue_capacity: profile.result_queue.max(1),
            transaction_size: self.transaction_size,
            stats: self.stats.clone(),
        };
        let h_aggregator = tokio::spawn(writer.run(result_rx, cancel.clone()));

        // --- Join barrier ---

        let mut fatal: Option<PipelineError> = None;

        match h_dispatcher.await {
            Ok(sent) => tracing::debug!("Dispatcher: joined after {} items", sent),
            Err(e) => {
                cancel.cancel();
                fatal.get_or_insert(PipelineError::Task {
                    stage: "dispatcher",
                    message: e.to_string(),
                });
            }
        }

        for (i, result) in futures::future::join_all(h_workers)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(e) = result {
                tracing::error!("Worker {} panicked: {}", i, e);
                cancel.cancel();
                fatal.get_or_insert(PipelineError::Task {
                    stage: "worker",
                    message: e.to_string(),
                });
            }
        }

        let batch_sizes = match h_aggregator.await {
            Ok(Ok(sizes)) => sizes,
            Ok(Err(e)) => {
                // Writer failures take precedence: they are the root cause
                // of any cancellation the other stages observed.
                fatal = Some(e);
                Vec::new()
            }
            Err(e) => {
                fatal.get_or_insert(PipelineError::Task {
                    stage: "aggregator",
                    message: e.to_string(),
                });
                Vec::new()
            }
        };

        // Every sender is gone; drain whatever fit in the error buffer.
        let mut errors = Vec::new();
        while let Ok(e) = error_rx.try_recv() {
            errors.push(e);
        }

        self.stats.finish();
        let s = self.stats.snapshot();

        if let Some(e) = fatal {
            tracing::error!(
                "Ingest {} aborted: {} ({} of {} items processed, {} rows committed)",
                run_id,
                e,
                s.processed,
                s.dispatched,
                s.rows_written
            );
            return Err(e);
        }

        Ok(IngestReport {
            run_id,
            dispatched: s.dispatched,
            succeeded: s.succeeded,
            failed: s.failed,
            written: s.rows_written,
            duplicates: s.duplicates_skipped,
            batch_sizes,
            errors,
            elapsed: started.elapsed(),
        })
    }
}

// ---------------------------------------------------------------------------
// Stage 1: Dispatcher, stream input into the work queue
// ---------------------------------------------------------------------------

async fn dispatcher_stage<I>(
    items: I,
    tx: mpsc::Sender<WorkItem>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> usize
where
    I: Iterator<Item = WorkItem>,
{
    let mut sent = 0usize;

    for item in items {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Dispatcher: cancelled after {} items", sent);
                break;
            }
            res = tx.send(item) => {
                if res.is_err() {
                    tracing::warn!("Dispatcher: work queue closed, aborting");
                    break;
                }
            }
        }

        sent += 1;
        stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    tracing::info!("Dispatcher: {} items queued", sent);
    sent
}

// ---------------------------------------------------------------------------
// Stage 2: Workers, transform on the blocking pool, resolve references
// ---------------------------------------------------------------------------

struct WorkerContext {
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    tx: mpsc::Sender<ProcessedRecord>,
    errors: mpsc::Sender<ErrorRecord>,
    store: Arc<dyn PoemStore>,
    transformer: Arc<Transformer>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

async fn worker(ctx: WorkerContext) {
    let mut produced = 0usize;

    loop {
        // Lock receiver, grab one message, release lock immediately
        let item = {
            let mut rx = ctx.rx.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };

        let Some(item) = item else {
            break; // Queue closed and drained, or run cancelled
        };
        let label = item.label();

        match process_item(&ctx, item).await {
            Ok(record) => {
                // Blocks while the writer is behind: this is what throttles
                // the workers to the store's write throughput.
                let delivered = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => false,
                    res = ctx.tx.send(record) => res.is_ok(),
                };
                if !delivered {
                    break;
                }
                ctx.stats.record_success();
                produced += 1;
            }
            Err(cause) => {
                ctx.stats.record_failure();
                tracing::warn!("Worker {}: skipping {}: {:#}", ctx.worker_id, label, cause);
                // Never wait on the error buffer; drop the record when full.
                let _ = ctx.errors.try_send(ErrorRecord {
                    worker_id: ctx.worker_id,
                    item: label,
                    cause,
                });
            }
        }
    }

    tracing::debug!("Worker {}: exiting after {} records", ctx.worker_id, produced);
}

async fn process_item(ctx: &WorkerContext, item: WorkItem) -> anyhow::Result<ProcessedRecord> {
    // Offload CPU-heavy work to the blocking thread pool
    let transformer = ctx.transformer.clone();
    let t = tokio::task::spawn_blocking(move || transformer.transform(&item))
        .await
        .map_err(|e| anyhow!("transform task panicked: {}", e))??;

    let dynasty_id = ctx
        .store
        .lookup_or_create(&Entity::Dynasty { name: &t.dynasty })
        .await
        .with_context(|| format!("resolve dynasty '{}'", t.dynasty))?;

    let author_id = ctx
        .store
        .lookup_or_create(&Entity::Author {
            id: t.author_id,
            name: &t.author,
            dynasty_id,
            pinyin: &t.author_pinyin,
            pinyin_abbr: &t.author_pinyin_abbr,
        })
        .await
        .with_context(|| format!("resolve author '{}'", t.author))?;

    let type_id = ctx
        .store
        .lookup_or_create(&Entity::PoemType {
            name: t.form.name(),
            category: t.form.category(),
        })
        .await
        .with_context(|| format!("resolve poem type '{}'", t.form.name()))?;

    Ok(ProcessedRecord {
        id: t.id,
        title: t.title,
        title_pinyin: t.title_pinyin,
        title_pinyin_abbr: t.title_pinyin_abbr,
        author: t.author,
        author_id,
        dynasty_id,
        type_id,
        rhythmic: t.rhythmic,
        paragraphs: t.paragraphs,
        content: t.content,
        content_hash: t.content_hash,
        source: t.source,
    })
}

// ---------------------------------------------------------------------------
// Stage 3: Aggregator, the single writer
// ---------------------------------------------------------------------------

struct Aggregator {
    store: Arc<dyn PoemStore>,
    bounds: BatchBounds,
    queue_capacity: usize,
    transaction_size: usize,
    stats: Arc<PipelineStats>,
}

impl Aggregator {
    /// Consume the result queue until it closes. Returns the size of every
    /// flush. On a write failure the run is cancelled and the error returned.
    async fn run(
        self,
        mut rx: mpsc::Receiver<ProcessedRecord>,
        cancel: CancellationToken,
    ) -> Result<Vec<usize>> {
        let mut sizer = BatchSizer::new(self.bounds);
        let mut buffer: Vec<ProcessedRecord> = Vec::with_capacity(sizer.current());
        let mut flushes: Vec<usize> = Vec::new();

        tracing::info!("Aggregator: started, initial batch size {}", sizer.current());

        while let Some(record) = rx.recv().await {
            buffer.push(record);

            let target = sizer.observe(utilization(rx.len(), self.queue_capacity));
            if buffer.len() >= target {
                let n = buffer.len();
                if let Err(e) = self.flush(&mut buffer, flushes.len() + 1).await {
                    tracing::error!("Aggregator: {}; cancelling pipeline", e);
                    cancel.cancel();
                    return Err(e);
                }
                flushes.push(n);
            }
        }

        tracing::info!("Aggregator: result queue closed, draining {} records", buffer.len());

        if !buffer.is_empty() {
            let n = buffer.len();
            if let Err(e) = self.flush(&mut buffer, flushes.len() + 1).await {
                tracing::error!("Aggregator: final {}", e);
                cancel.cancel();
                return Err(e);
            }
            flushes.push(n);
        }

        tracing::info!(
            "Aggregator: completed, {} batches, {} rows written",
            flushes.len(),
            self.stats.rows_written.load(Ordering::Relaxed)
        );
        Ok(flushes)
    }

    /// Hand the buffer to the store in one transactional write and reset it.
    async fn flush(&self, buffer: &mut Vec<ProcessedRecord>, batch_no: usize) -> Result<()> {
        let batch = std::mem::take(buffer);
        let records = batch.len();
        tracing::debug!("Aggregator: flushing batch {} with {} records", batch_no, records);

        let inserted = self
            .store
            .batch_insert_transactional(
                &batch,
                self.transaction_size,
                INSERT_ROWS_PER_STATEMENT,
                None,
            )
            .await
            .map_err(|source| PipelineError::Flush {
                batch: batch_no,
                records,
                source,
            })?;

        self.stats.record_flush(records, inserted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::models::{EntityKind, ScriptMode};
    use crate::storage::{ProgressSink, SqliteStorage};

    /// In-memory store; optionally fails the n-th batch write.
    #[derive(Default)]
    struct MemoryStore {
        refs: std::sync::Mutex<HashMap<(EntityKind, String), i64>>,
        poems: std::sync::Mutex<HashMap<i64, ProcessedRecord>>,
        flush_calls: AtomicUsize,
        fail_on_flush: Option<usize>,
    }

    impl MemoryStore {
        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_flush: Some(call),
                ..Self::default()
            }
        }

        fn len(&self) -> usize {
            self.poems.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PoemStore for MemoryStore {
        async fn lookup_or_create(&self, entity: &Entity<'_>) -> crate::storage::Result<i64> {
            let mut refs = self.refs.lock().unwrap();
            let next = refs.len() as i64 + 1;
            let id = match *entity {
                Entity::Author { id, .. } => id,
                _ => next,
            };
            Ok(*refs
                .entry((entity.kind(), entity.name().to_string()))
                .or_insert(id))
        }

        async fn batch_insert(
            &self,
            records: &[ProcessedRecord],
            _batch_size: usize,
        ) -> crate::storage::Result<u64> {
            let mut poems = self.poems.lock().unwrap();
            let mut inserted = 0;
            for r in records {
                if !poems.contains_key(&r.id) {
                    poems.insert(r.id, r.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        async fn batch_insert_transactional(
            &self,
            records: &[ProcessedRecord],
            _transaction_size: usize,
            batch_size: usize,
            _progress: Option<ProgressSink<'_>>,
        ) -> crate::storage::Result<u64> {
            let call = self.flush_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_flush == Some(call) {
                return Err(StorageError::Database(sqlx::Error::Protocol(
                    "injected write failure".into(),
                )));
            }
            self.batch_insert(records, batch_size).await
        }
    }

    fn item(title: &str, author: &str) -> WorkItem {
        WorkItem {
            title: title.into(),
            author: author.into(),
            paragraphs: vec!["床前明月光，疑是地上霜。".into(), "举头望明月，低头思故乡。".into()],
            rhythmic: None,
            tags: Vec::new(),
            source: "poet.tang".into(),
            dynasty: "唐".into(),
        }
    }

    fn numbered(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| item(&format!("诗{}", i), "李白")).collect()
    }

    /// Large result queue so utilization stays low and the batch stays at max.
    fn quiet_profile(batch: BatchBounds) -> ResourceProfile {
        ResourceProfile {
            result_queue: 10_000,
            batch,
            ..ResourceProfile::for_cpus(4)
        }
    }

    fn ingestor(store: Arc<dyn PoemStore>, profile: ResourceProfile) -> Ingestor {
        let transformer = Transformer::builtin(ScriptMode::Simplified);
        let mut ingestor = Ingestor::new(store, transformer, profile);
        ingestor.set_workers(4);
        ingestor
    }

    #[tokio::test]
    async fn test_identical_items_stored_once() {
        let store = Arc::new(MemoryStore::default());
        let ing = ingestor(store.clone(), quiet_profile(BatchBounds::new(10, 50, 100)));

        let report = ing
            .process(Uuid::new_v4(), vec![item("静夜思", "李白"); 3])
            .await
            .unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.written, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.batch_sizes, vec![3]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_report_carries_caller_run_id() {
        let store = Arc::new(MemoryStore::default());
        let ing = ingestor(store, quiet_profile(BatchBounds::new(10, 50, 100)));
        let run_id = Uuid::new_v4();

        let report = ing.process(run_id, numbered(5)).await.unwrap();

        assert_eq!(report.run_id, run_id);
    }

    #[tokio::test]
    async fn test_write_failure_cancels_blocked_producers() {
        // Single-slot queues and many workers: every producer is parked on a
        // full channel when the writer fails.
        let store = Arc::new(MemoryStore::failing_on(2));
        let profile = ResourceProfile {
            work_queue: 1,
            result_queue: 1,
            error_buffer: 1,
            batch: BatchBounds::new(2, 2, 2),
            ..ResourceProfile::for_cpus(4)
        };
        let mut ing = ingestor(store.clone(), profile);
        ing.set_workers(8);

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            ing.process(Uuid::new_v4(), numbered(5000)),
        )
        .await
        .expect("pipeline hung after a write failure");

        match outcome {
            Err(PipelineError::Flush { batch, records, .. }) => {
                assert_eq!(batch, 2);
                assert_eq!(records, 2);
            }
            other => panic!("expected flush failure, got {:?}", other.map(|r| r.run_id)),
        }
        assert_eq!(store.len(), 2);
        assert!(ing.stats().snapshot().dispatched < 5000);
    }

    #[tokio::test]
    async fn test_under_batch_size_flushes_once_on_drain() {
        let store = Arc::new(MemoryStore::default());
        let mut ing = ingestor(store.clone(), quiet_profile(BatchBounds::new(100, 300, 500)));
        ing.set_batch_size(300);

        let report = ing.process(Uuid::new_v4(), numbered(250)).await.unwrap();

        assert_eq!(report.batch_sizes, vec![250]);
        assert_eq!(report.written, 250);
        assert_eq!(store.flush_calls.load(Ordering::SeqCst), 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_write_failure_aborts_and_keeps_committed_batches() {
        let store = Arc::new(MemoryStore::failing_on(2));
        let ing = ingestor(store.clone(), quiet_profile(BatchBounds::new(10, 10, 10)));

        let err = ing.process(Uuid::new_v4(), numbered(30)).await.unwrap_err();

        match err {
            PipelineError::Flush { batch, records, .. } => {
                assert_eq!(batch, 2);
                assert_eq!(records, 10);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(store.len(), 10);
        assert!(!ing.stats().snapshot().active);
    }

    #[tokio::test]
    async fn test_counts_balance_with_item_failures() {
        let store = Arc::new(MemoryStore::default());
        let ing = ingestor(store.clone(), quiet_profile(BatchBounds::new(4, 8, 16)));

        let mut items = numbered(20);
        for it in items.iter_mut().step_by(4) {
            it.author = "   ".into();
        }

        let report = ing.process(Uuid::new_v4(), items).await.unwrap();

        assert_eq!(report.dispatched, 20);
        assert_eq!(report.failed, 5);
        assert_eq!(report.succeeded, 15);
        assert_eq!(report.succeeded + report.failed, report.dispatched);
        assert_eq!(report.errors.len(), 5);
        assert!(report.errors[0].to_string().contains("author"));
        assert_eq!(report.batch_sizes.iter().sum::<usize>(), 15);

        let snapshot = ing.stats().snapshot();
        assert_eq!(snapshot.processed, 20);
        assert!(!snapshot.active);

        match report.into_result() {
            Err(PipelineError::ItemFailures { failed, total }) => {
                assert_eq!((failed, total), (5, 20));
            }
            other => panic!("expected item failures, got {:?}", other.map(|r| r.run_id)),
        }
    }

    #[tokio::test]
    async fn test_error_buffer_overflow_drops_records() {
        let store = Arc::new(MemoryStore::default());
        let profile = ResourceProfile {
            error_buffer: 3,
            ..quiet_profile(BatchBounds::new(4, 8, 16))
        };
        let ing = ingestor(store, profile);

        let items: Vec<WorkItem> = (0..10).map(|i| item(&format!("题{}", i), "")).collect();
        let report = ing.process(Uuid::new_v4(), items).await.unwrap();

        assert_eq!(report.failed, 10);
        assert_eq!(report.errors.len(), 3);
        assert!(report.batch_sizes.is_empty());
    }

    #[tokio::test]
    async fn test_batches_stay_within_bounds_under_pressure() {
        let store = Arc::new(MemoryStore::default());
        let bounds = BatchBounds::new(5, 10, 20);
        let profile = ResourceProfile {
            result_queue: 8,
            work_queue: 16,
            batch: bounds,
            ..ResourceProfile::for_cpus(4)
        };
        let ing = ingestor(store.clone(), profile);

        let report = ing.process(Uuid::new_v4(), numbered(200)).await.unwrap();

        let (last, full) = report.batch_sizes.split_last().unwrap();
        assert!(*last >= 1 && *last <= bounds.max);
        for size in full {
            assert!(*size >= bounds.min && *size <= bounds.max, "batch {}", size);
        }
        assert_eq!(report.batch_sizes.iter().sum::<usize>(), 200);
        assert_eq!(store.len(), 200);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = Arc::new(MemoryStore::default());
        let ing = ingestor(store.clone(), ResourceProfile::for_cpus(2));

        let report = ing.process(Uuid::new_v4(), Vec::new()).await.unwrap();

        assert_eq!(report.dispatched, 0);
        assert!(report.batch_sizes.is_empty());
        assert_eq!(store.flush_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_batch_size_ignores_non_positive() {
        let mut ing = ingestor(
            Arc::new(MemoryStore::default()),
            quiet_profile(BatchBounds::new(100, 300, 500)),
        );
        ing.set_batch_size(0);
        ing.set_batch_size(-5);
        assert_eq!(ing.batch_bounds(), BatchBounds::new(100, 300, 500));

        ing.set_batch_size(800);
        assert_eq!(ing.batch_bounds(), BatchBounds::new(100, 800, 800));
    }

    #[tokio::test]
    async fn test_sqlite_rerun_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("poems.db");
        let storage = SqliteStorage::new(db_path.to_str().unwrap()).await.unwrap();
        storage.migrate().await.unwrap();
        let store = Arc::new(storage.clone());

        let mut items = numbered(40);
        items.push(WorkItem {
            title: String::new(),
            author: "苏轼".into(),
            paragraphs: vec!["明月几时有？把酒问青天。".into()],
            rhythmic: Some("水调歌头".into()),
            tags: Vec::new(),
            source: "ci.song".into(),
            dynasty: "宋".into(),
        });

        let ing = ingestor(store.clone(), quiet_profile(BatchBounds::new(8, 16, 32)));
        let first = ing.process(Uuid::new_v4(), items.clone()).await.unwrap();
        assert_eq!(first.written, 41);

        let counts = storage.counts().await.unwrap();
        assert_eq!(counts.poems, 41);
        assert_eq!(counts.authors, 2);
        assert_eq!(counts.dynasties, 2);

        let second = ing.process(Uuid::new_v4(), items).await.unwrap();
        assert_eq!(second.succeeded, 41);
        assert_eq!(second.written, 0);
        assert_eq!(second.duplicates, 41);
        assert_eq!(storage.counts().await.unwrap().poems, 41);
    }
}
