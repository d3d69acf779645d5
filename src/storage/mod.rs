pub mod sqlite;

use async_trait::async_trait;

use crate::models::{Entity, ProcessedRecord};

pub use sqlite::{Result, SqliteStorage, StorageError};

/// Callback invoked with the number of records committed so far.
pub type ProgressSink<'a> = &'a (dyn Fn(usize) + Send + Sync);

/// Storage operations the ingestion pipeline depends on.
///
/// `lookup_or_create` is called concurrently by every worker and must be safe
/// under racing callers. The batch-write methods are called by a single
/// writer at a time.
#[async_trait]
pub trait PoemStore: Send + Sync {
    /// Insert the entity if absent and return its id.
    async fn lookup_or_create(&self, entity: &Entity<'_>) -> Result<i64>;

    /// Insert records in multi-row statements of `batch_size` rows, skipping
    /// rows that conflict with existing ones. Returns rows actually inserted.
    async fn batch_insert(&self, records: &[ProcessedRecord], batch_size: usize) -> Result<u64>;

    /// Like [`batch_insert`](Self::batch_insert) but commits every
    /// `transaction_size` records in one transaction.
    async fn batch_insert_transactional(
        &self,
        records: &[ProcessedRecord],
        transaction_size: usize,
        batch_size: usize,
        progress: Option<ProgressSink<'_>>,
    ) -> Result<u64>;
}
