//! Metrics store access.
//!
//! `MetricStore` is the seam between the ingestion pipeline and the storage
//! engine: the pipeline only needs a transactional bulk write that reports
//! how many rows the store accepted. The production implementation targets
//! PostgreSQL through a shared `sqlx` pool; `mock` provides a scripted
//! in-memory store for pipeline tests.

pub mod mock;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use uuid::Uuid;

pub use sqlx::PgPool;

use crate::model::{MetricSample, TagMap};

/// Storage-level failure.
#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            StoreError::Unavailable(_) => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

/// Write side of the metrics store.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Writes a batch in a single transaction and returns the number of rows
    /// the store reports as inserted. Any error rolls the transaction back.
    async fn write_batch(&self, batch: &[MetricSample]) -> Result<u64, StoreError>;
}

/// Columnar bulk insert: one statement, one round trip, all values bound.
const INSERT_BATCH_SQL: &str = "\
INSERT INTO metrics (timestamp, device_id, metric_group, tags, val_used, val_total) \
SELECT * FROM UNNEST($1::timestamptz[], $2::uuid[], $3::text[], $4::jsonb[], $5::float8[], $6::float8[])";

/// PostgreSQL-backed metrics store over a shared connection pool.
///
/// The pool is shared with the query path at call granularity; no connection
/// is held across anything but a single statement or transaction.
pub struct PgMetricStore {
    pool: PgPool,
}

impl PgMetricStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetricStore for PgMetricStore {
    async fn write_batch(&self, batch: &[MetricSample]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut timestamps: Vec<DateTime<Utc>> = Vec::with_capacity(batch.len());
        let mut device_ids: Vec<Uuid> = Vec::with_capacity(batch.len());
        let mut metric_groups: Vec<String> = Vec::with_capacity(batch.len());
        let mut tags: Vec<Json<TagMap>> = Vec::with_capacity(batch.len());
        let mut val_used: Vec<Option<f64>> = Vec::with_capacity(batch.len());
        let mut val_total: Vec<Option<f64>> = Vec::with_capacity(batch.len());
        for sample in batch {
            timestamps.push(sample.timestamp);
            device_ids.push(sample.device_id);
            metric_groups.push(sample.metric_group.clone());
            tags.push(Json(sample.tags.clone()));
            val_used.push(sample.val_used);
            val_total.push(sample.val_total);
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(INSERT_BATCH_SQL)
            .bind(&timestamps)
            .bind(&device_ids)
            .bind(&metric_groups)
            .bind(&tags)
            .bind(&val_used)
            .bind(&val_total)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }
}

/// Opens the shared connection pool against the metrics database.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

const SCHEMA_STATEMENTS: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS metrics (
        timestamp    TIMESTAMPTZ NOT NULL,
        device_id    UUID        NOT NULL,
        metric_group TEXT        NOT NULL,
        tags         JSONB       NOT NULL DEFAULT '{}'::jsonb,
        val_used     DOUBLE PRECISION,
        val_total    DOUBLE PRECISION,
        extra_data   JSONB
    )",
    "CREATE INDEX IF NOT EXISTS idx_metrics_device_time ON metrics (device_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_group_time ON metrics (metric_group, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_tags ON metrics USING GIN (tags)",
];

/// Creates the metrics table and its read-path indexes if missing.
/// Retention and compaction stay with the store's native tooling.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
