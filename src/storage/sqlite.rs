use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::{PoemStore, ProgressSink};
use crate::models::{Author, Entity, EntityKind, IngestRun, Poem, ProcessedRecord, StoreCounts};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} id {id} already belongs to '{existing}', cannot assign to '{requested}'")]
    IdentityCollision {
        kind: EntityKind,
        id: i64,
        existing: String,
        requested: String,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Upper bound on rows per multi-row INSERT (12 binds per row).
const MAX_ROWS_PER_STATEMENT: usize = 500;

const INSERT_POEMS: &str = "INSERT INTO poems (id, title, title_pinyin, title_pinyin_abbr, \
    author_id, dynasty_id, type_id, rhythmic, content, content_hash, source, created_at) ";

/// Query performance metrics
#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    pub total_writes: Arc<AtomicU64>,
    pub slow_writes: Arc<AtomicU64>,
    pub total_write_time_ms: Arc<AtomicU64>,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, duration_ms: u64) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        self.total_write_time_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        // Batch writes over 1s are considered slow
        if duration_ms > 1000 {
            self.slow_writes.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Slow batch write detected: {}ms", duration_ms);
        }
    }

    pub fn get_stats(&self) -> (u64, u64, u64) {
        (
            self.total_writes.load(Ordering::Relaxed),
            self.slow_writes.load(Ordering::Relaxed),
            self.total_write_time_ms.load(Ordering::Relaxed),
        )
    }
}

/// SQLite storage for poems and their reference tables
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    metrics: QueryMetrics,
    /// Serializes the batch-write path: one write transaction in flight.
    write_gate: Arc<Mutex<()>>,
    /// Resolved reference ids; saves a round-trip per item for hot names.
    lookup_cache: Arc<RwLock<HashMap<(EntityKind, String), i64>>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("cache_size", "-64000") // 64MB cache
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Some(Duration::from_secs(300)))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            metrics: QueryMetrics::new(),
            write_gate: Arc::new(Mutex::new(())),
            lookup_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get write metrics
    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("SQLite migrations completed");
        Ok(())
    }

    // === Reference rows ===

    async fn resolve_dynasty(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO dynasties (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;

        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM dynasties WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn resolve_poem_type(&self, name: &str, category: &str) -> Result<i64> {
        sqlx::query(
            "INSERT INTO poem_types (name, category) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(category)
        .execute(&self.pool)
        .await?;

        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM poem_types WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Authors are keyed by their derived id; a different name already
    /// holding that id is a collision, reported rather than overwritten.
    async fn resolve_author(
        &self,
        id: i64,
        name: &str,
        dynasty_id: i64,
        pinyin: &str,
        pinyin_abbr: &str,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO authors (id, name, dynasty_id, pinyin, pinyin_abbr)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(dynasty_id)
        .bind(pinyin)
        .bind(pinyin_abbr)
        .execute(&self.pool)
        .await?;

        let existing = sqlx::query_scalar::<_, String>("SELECT name FROM authors WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        if existing == name {
            Ok(id)
        } else {
            Err(StorageError::IdentityCollision {
                kind: EntityKind::Author,
                id,
                existing,
                requested: name.to_string(),
            })
        }
    }

    // === Poems ===

    pub async fn get_poem(&self, id: i64) -> Result<Option<Poem>> {
        let poem = sqlx::query_as::<_, Poem>(
            r#"
            SELECT id, title, title_pinyin, title_pinyin_abbr, author_id, dynasty_id, type_id,
                   rhythmic, content, content_hash, source, created_at
            FROM poems WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(poem)
    }

    pub async fn get_author(&self, id: i64) -> Result<Option<Author>> {
        let author = sqlx::query_as::<_, Author>(
            "SELECT id, name, dynasty_id, pinyin, pinyin_abbr FROM authors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(author)
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let (poems, authors, dynasties, poem_types, runs) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM poems),
                    (SELECT COUNT(*) FROM authors),
                    (SELECT COUNT(*) FROM dynasties),
                    (SELECT COUNT(*) FROM poem_types),
                    (SELECT COUNT(*) FROM ingest_runs)
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreCounts {
            poems,
            authors,
            dynasties,
            poem_types,
            runs,
        })
    }

    // === Ingest runs ===

    pub async fn record_run(&self, run: &IngestRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_runs (id, started_at, finished_at, dispatched, succeeded, failed, written, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                dispatched = excluded.dispatched,
                succeeded = excluded.succeeded,
                failed = excluded.failed,
                written = excluded.written,
                status = excluded.status
            "#,
        )
        .bind(&run.id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.dispatched)
        .bind(run.succeeded)
        .bind(run.failed)
        .bind(run.written)
        .bind(&run.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<IngestRun>> {
        let runs = sqlx::query_as::<_, IngestRun>(
            r#"
            SELECT id, started_at, finished_at, dispatched, succeeded, failed, written, status
            FROM ingest_runs ORDER BY started_at DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}

/// Multi-row INSERT for `rows`; conflicting rows (same id, or same
/// title/author/content hash) are skipped.
fn poem_insert_query(rows: &[ProcessedRecord], now: i64) -> QueryBuilder<'_, Sqlite> {
    let mut builder = QueryBuilder::new(INSERT_POEMS);
    builder.push_values(rows, |mut b, r| {
        b.push_bind(r.id)
            .push_bind(&r.title)
            .push_bind(&r.title_pinyin)
            .push_bind(&r.title_pinyin_abbr)
            .push_bind(r.author_id)
            .push_bind(r.dynasty_id)
            .push_bind(r.type_id)
            .push_bind(r.rhythmic.as_deref())
            .push_bind(&r.content)
            .push_bind(&r.content_hash)
            .push_bind(r.source.as_str())
            .push_bind(now);
    });
    builder.push(" ON CONFLICT DO NOTHING");
    builder
}

fn rows_per_statement(batch_size: usize) -> usize {
    batch_size.clamp(1, MAX_ROWS_PER_STATEMENT)
}

#[async_trait]
impl PoemStore for SqliteStorage {
    async fn lookup_or_create(&self, entity: &Entity<'_>) -> Result<i64> {
        let key = (entity.kind(), entity.name().to_string());
        if let Some(&id) = self.lookup_cache.read().await.get(&key) {
            return Ok(id);
        }

        let id = match *entity {
            Entity::Dynasty { name } => self.resolve_dynasty(name).await?,
            Entity::PoemType { name, category } => self.resolve_poem_type(name, category).await?,
            Entity::Author {
                id,
                name,
                dynasty_id,
                pinyin,
                pinyin_abbr,
            } => {
                self.resolve_author(id, name, dynasty_id, pinyin, pinyin_abbr)
                    .await?
            }
        };

        self.lookup_cache.write().await.insert(key, id);
        Ok(id)
    }

    async fn batch_insert(&self, records: &[ProcessedRecord], batch_size: usize) -> Result<u64> {
        let _gate = self.write_gate.lock().await;
        let start = Instant::now();
        let now = chrono::Utc::now().timestamp();

        let mut inserted = 0u64;
        for chunk in records.chunks(rows_per_statement(batch_size)) {
            let mut query = poem_insert_query(chunk, now);
            inserted += query.build().execute(&self.pool).await?.rows_affected();
        }

        self.metrics
            .record_write(start.elapsed().as_millis() as u64);
        Ok(inserted)
    }

    async fn batch_insert_transactional(
        &self,
        records: &[ProcessedRecord],
        transaction_size: usize,
        batch_size: usize,
        progress: Option<ProgressSink<'_>>,
    ) -> Result<u64> {
        let _gate = self.write_gate.lock().await;
        let start = Instant::now();
        let now = chrono::Utc::now().timestamp();

        let mut inserted = 0u64;
        let mut committed = 0usize;
        for txn_chunk in records.chunks(transaction_size.max(1)) {
            let mut tx = self.pool.begin().await?;
            for chunk in txn_chunk.chunks(rows_per_statement(batch_size)) {
                let mut query = poem_insert_query(chunk, now);
                inserted += query.build().execute(&mut *tx).await?.rows_affected();
            }
            tx.commit().await?;

            committed += txn_chunk.len();
            if let Some(report) = progress {
                report(committed);
            }
        }

        self.metrics
            .record_write(start.elapsed().as_millis() as u64);
        tracing::debug!(
            "SQLite: committed {} records ({} new) in {:?}",
            records.len(),
            inserted,
            start.elapsed()
        );
        Ok(inserted)
    }
}
