//! Scripted in-memory store for exercising the ingestion pipeline without a
//! database: failure sequences, short row counts, and recorded writes.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::MetricSample;
use crate::store::{MetricStore, StoreError};

#[derive(Default)]
struct MockInner {
    written: Vec<Vec<MetricSample>>,
    attempts: u64,
    fail_next: u32,
    short_count: bool,
}

/// In-memory `MetricStore` with scripted behavior.
#[derive(Default)]
pub struct MockStore {
    inner: Mutex<MockInner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` writes fail with `StoreError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().unwrap().fail_next = n;
    }

    /// When set, writes succeed but report one row fewer than written.
    pub fn set_short_count(&self, short: bool) {
        self.inner.lock().unwrap().short_count = short;
    }

    /// Batches accepted so far, in write order.
    pub fn written(&self) -> Vec<Vec<MetricSample>> {
        self.inner.lock().unwrap().written.clone()
    }

    /// Sizes of the accepted batches, in write order.
    pub fn write_sizes(&self) -> Vec<usize> {
        self.inner
            .lock()
            .unwrap()
            .written
            .iter()
            .map(Vec::len)
            .collect()
    }

    /// Total write attempts, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.inner.lock().unwrap().attempts
    }
}

#[async_trait]
impl MetricStore for MockStore {
    async fn write_batch(&self, batch: &[MetricSample]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(StoreError::Unavailable("scripted failure".to_string()));
        }
        let reported = if inner.short_count {
            batch.len().saturating_sub(1) as u64
        } else {
            batch.len() as u64
        };
        if !inner.short_count {
            inner.written.push(batch.to_vec());
        }
        Ok(reported)
    }
}
