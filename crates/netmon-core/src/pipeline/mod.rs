//! Metrics ingestion pipeline.
//!
//! Absorbs a high-rate stream of metric samples and persists them in bulk:
//! samples flow through a bounded intake queue into the active batch, which
//! is flushed when it reaches the size threshold or when the periodic timer
//! elapses with data buffered. A failed flush lands in a bounded requeue
//! buffer and is retried ahead of newer intake on the next flush; after too
//! many consecutive failures the failing batch is dropped outright so a
//! storage outage cannot grow memory without bound.
//!
//! The intake queue is the system's sole deliberate backpressure point:
//! `submit` blocks only until a slot frees or the caller's own cancellation
//! fires. Ingestion failures never propagate to submitters.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::{MetricSample, SampleError};
use crate::store::{MetricStore, StoreError};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================
// Configuration
// ============================================================

/// Pipeline tuning knobs. Zero values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Batch size threshold that triggers a flush.
    pub batch_size: usize,
    /// Periodic flush interval for partially filled batches.
    pub flush_interval: Duration,
    /// Consecutive write failures tolerated before a failing batch is
    /// dropped instead of requeued.
    pub max_consecutive_failures: u32,
    /// Upper bound on a single storage write, including the final flush
    /// during drain.
    pub write_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Returns a copy with every zero field replaced by its default.
    pub fn normalized(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.batch_size == 0 {
            cfg.batch_size = DEFAULT_BATCH_SIZE;
        }
        if cfg.flush_interval.is_zero() {
            cfg.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if cfg.max_consecutive_failures == 0 {
            cfg.max_consecutive_failures = DEFAULT_MAX_CONSECUTIVE_FAILURES;
        }
        if cfg.write_timeout.is_zero() {
            cfg.write_timeout = DEFAULT_WRITE_TIMEOUT;
        }
        cfg
    }

    fn intake_capacity(&self) -> usize {
        self.batch_size * 2
    }

    fn requeue_capacity(&self) -> usize {
        self.batch_size * 10
    }
}

// ============================================================
// Observability
// ============================================================

/// Lifecycle of a pipeline instance. The processing loop runs exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Running,
            1 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Running => 0,
            PipelineState::Draining => 1,
            PipelineState::Stopped => 2,
        }
    }
}

/// Monotonic counters: every submitted sample is eventually reflected in
/// `flushed_rows` or `dropped`.
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    flushes: AtomicU64,
    flushed_rows: AtomicU64,
    failed_flushes: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub flushes: u64,
    pub flushed_rows: u64,
    pub failed_flushes: u64,
    pub requeued: u64,
    pub dropped: u64,
}

impl PipelineStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flushed_rows: self.flushed_rows.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================
// Errors
// ============================================================

/// Intake rejection. Backpressure itself is not an error: `submit` blocks on
/// a full queue and only fails on invalid input, cancellation, or a pipeline
/// that already stopped.
#[derive(Debug)]
pub enum SubmitError {
    Invalid(SampleError),
    Cancelled,
    Closed,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Invalid(e) => write!(f, "invalid sample: {}", e),
            SubmitError::Cancelled => write!(f, "submit cancelled"),
            SubmitError::Closed => write!(f, "pipeline stopped"),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

/// A flush that did not persist its batch. Contained inside the pipeline;
/// never surfaced to submitters.
#[derive(Debug)]
pub enum FlushError {
    Store(StoreError),
    /// The store reported success but inserted a different number of rows
    /// than the batch length.
    CountMismatch { expected: usize, inserted: u64 },
    Timeout(Duration),
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushError::Store(e) => write!(f, "batch write failed: {}", e),
            FlushError::CountMismatch { expected, inserted } => {
                write!(
                    f,
                    "insert count mismatch: expected {}, store reported {}",
                    expected, inserted
                )
            }
            FlushError::Timeout(limit) => {
                write!(f, "batch write exceeded {}ms", limit.as_millis())
            }
        }
    }
}

impl std::error::Error for FlushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlushError::Store(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Handle
// ============================================================

/// Cloneable intake handle used by pollers to submit samples.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<MetricSample>,
    stats: Arc<PipelineStats>,
    state: Arc<AtomicU8>,
}

impl PipelineHandle {
    /// Enqueues a sample, blocking until intake space frees or the caller's
    /// cancellation fires. This is the only place producers are slowed down.
    pub async fn submit(
        &self,
        sample: MetricSample,
        cancel: &CancellationToken,
    ) -> Result<(), SubmitError> {
        sample.validate().map_err(SubmitError::Invalid)?;

        tokio::select! {
            _ = cancel.cancelled() => Err(SubmitError::Cancelled),
            sent = self.tx.send(sample) => match sent {
                Ok(()) => {
                    self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(_) => Err(SubmitError::Closed),
            },
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

// ============================================================
// Pipeline
// ============================================================

/// The ingestion pipeline. Constructed once, consumed by [`MetricPipeline::run`].
pub struct MetricPipeline {
    store: Arc<dyn MetricStore>,
    cfg: PipelineConfig,
    rx: mpsc::Receiver<MetricSample>,
    batch: Mutex<Vec<MetricSample>>,
    requeue: Mutex<Vec<MetricSample>>,
    consecutive_failures: AtomicU32,
    stats: Arc<PipelineStats>,
    state: Arc<AtomicU8>,
}

impl MetricPipeline {
    /// Creates the pipeline and its intake handle. Zero config fields are
    /// replaced by safe defaults.
    pub fn new(store: Arc<dyn MetricStore>, cfg: PipelineConfig) -> (PipelineHandle, Self) {
        let cfg = cfg.normalized();
        let (tx, rx) = mpsc::channel(cfg.intake_capacity());
        let stats = Arc::new(PipelineStats::default());
        let state = Arc::new(AtomicU8::new(PipelineState::Running.as_u8()));

        let handle = PipelineHandle {
            tx,
            stats: stats.clone(),
            state: state.clone(),
        };
        let batch_capacity = cfg.batch_size;
        let pipeline = Self {
            store,
            cfg,
            rx,
            batch: Mutex::new(Vec::with_capacity(batch_capacity)),
            requeue: Mutex::new(Vec::new()),
            consecutive_failures: AtomicU32::new(0),
            stats,
            state,
        };
        (handle, pipeline)
    }

    /// The single processing loop. Consuming `self` guarantees it executes
    /// at most once per instance.
    ///
    /// Drains intake into the active batch and flushes on whichever fires
    /// first: the batch-size threshold or the periodic timer (with a
    /// non-empty batch). On cancellation, remaining intake is drained and
    /// one best-effort final flush runs before the loop stops.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            batch_size = self.cfg.batch_size,
            flush_interval_ms = self.cfg.flush_interval.as_millis() as u64,
            max_consecutive_failures = self.cfg.max_consecutive_failures,
            "metric pipeline starting"
        );

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.cfg.flush_interval,
            self.cfg.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                received = self.rx.recv() => match received {
                    Some(sample) => {
                        let should_flush = {
                            let mut batch = self.batch.lock().unwrap();
                            batch.push(sample);
                            batch.len() >= self.cfg.batch_size
                        };
                        if should_flush {
                            if let Err(e) = self.flush().await {
                                error!(error = %e, "flush on batch size failed");
                            }
                        }
                    }
                    // All intake handles dropped; nothing more will arrive.
                    None => break,
                },

                _ = ticker.tick() => {
                    let has_data = !self.batch.lock().unwrap().is_empty();
                    if has_data {
                        if let Err(e) = self.flush().await {
                            error!(error = %e, "periodic flush failed");
                        }
                    }
                }
            }
        }

        self.set_state(PipelineState::Draining);
        info!("metric pipeline draining");

        // Pull whatever is still queued so the final flush accounts for it.
        self.rx.close();
        while let Ok(sample) = self.rx.try_recv() {
            self.batch.lock().unwrap().push(sample);
        }
        if let Err(e) = self.flush().await {
            error!(error = %e, "final flush failed");
        }

        self.set_state(PipelineState::Stopped);
        info!("metric pipeline stopped");
    }

    /// Swaps the active batch out, prepends previously requeued samples
    /// oldest-first, and writes the result in one transaction. Locks are
    /// held only for the in-memory swap, never across the storage call.
    async fn flush(&self) -> Result<(), FlushError> {
        let mut to_write = std::mem::take(&mut *self.requeue.lock().unwrap());
        {
            let mut batch = self.batch.lock().unwrap();
            if to_write.is_empty() && batch.is_empty() {
                return Ok(());
            }
            let mut fresh =
                std::mem::replace(&mut *batch, Vec::with_capacity(self.cfg.batch_size));
            to_write.append(&mut fresh);
        }

        let count = to_write.len();
        let started = Instant::now();
        let written = tokio::time::timeout(
            self.cfg.write_timeout,
            self.store.write_batch(&to_write),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match written {
            Ok(Ok(inserted)) if inserted == count as u64 => Ok(()),
            Ok(Ok(inserted)) => Err(FlushError::CountMismatch {
                expected: count,
                inserted,
            }),
            Ok(Err(e)) => Err(FlushError::Store(e)),
            Err(_) => Err(FlushError::Timeout(self.cfg.write_timeout)),
        };

        match outcome {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .flushed_rows
                    .fetch_add(count as u64, Ordering::Relaxed);
                debug!(batch_size = count, duration_ms, "batch written");
                Ok(())
            }
            Err(e) => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                let prior = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %e,
                    batch_size = count,
                    consecutive_failures = prior + 1,
                    duration_ms,
                    "batch write failed"
                );

                if prior < self.cfg.max_consecutive_failures {
                    self.requeue_batch(to_write);
                } else {
                    error!(
                        consecutive_failures = prior + 1,
                        dropped = count,
                        "max consecutive write failures reached, dropping batch"
                    );
                    self.stats.dropped.fetch_add(count as u64, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    /// Pushes a failed batch into the bounded requeue buffer. The batch is
    /// ordered oldest-first; when the buffer lacks room only the oldest
    /// samples that fit are kept and the newest are dropped, counted.
    fn requeue_batch(&self, mut batch: Vec<MetricSample>) {
        let mut requeue = self.requeue.lock().unwrap();
        let available = self.cfg.requeue_capacity().saturating_sub(requeue.len());

        if available == 0 {
            warn!(
                buffer_len = requeue.len(),
                dropped = batch.len(),
                "requeue buffer full, dropping failed batch"
            );
            self.stats
                .dropped
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            return;
        }

        let requested = batch.len();
        if requested > available {
            batch.truncate(available);
            warn!(
                requested,
                requeued = available,
                dropped = requested - available,
                "partial requeue, buffer limit reached"
            );
            self.stats
                .dropped
                .fetch_add((requested - available) as u64, Ordering::Relaxed);
        }

        self.stats
            .requeued
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        requeue.append(&mut batch);
        debug!(buffer_len = requeue.len(), "failed batch requeued for retry");
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockStore;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn sample(seq: i64) -> MetricSample {
        MetricSample {
            device_id: Uuid::new_v4(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            metric_group: "host.cpu".to_string(),
            tags: Default::default(),
            val_used: Some(seq as f64),
            val_total: Some(100.0),
        }
    }

    fn test_config(batch_size: usize, flush_interval: Duration) -> PipelineConfig {
        PipelineConfig {
            batch_size,
            flush_interval,
            ..PipelineConfig::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn flush_triggers_at_batch_size_before_timer() {
        let store = Arc::new(MockStore::new());
        let cfg = test_config(3, Duration::from_secs(60));
        let (handle, pipeline) = MetricPipeline::new(store.clone(), cfg);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(cancel.clone()));

        for i in 0..3 {
            handle.submit(sample(i), &cancel).await.unwrap();
        }
        wait_until(|| store.write_sizes() == vec![3]).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.write_sizes(), vec![3]);
        assert_eq!(handle.stats().dropped, 0);
    }

    #[tokio::test]
    async fn timer_flushes_a_single_buffered_sample() {
        let store = Arc::new(MockStore::new());
        let cfg = test_config(1000, Duration::from_millis(50));
        let (handle, pipeline) = MetricPipeline::new(store.clone(), cfg);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(cancel.clone()));

        handle.submit(sample(0), &cancel).await.unwrap();
        wait_until(|| store.write_sizes() == vec![1]).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn ingest_2500_samples_in_three_flushes() {
        let store = Arc::new(MockStore::new());
        let cfg = test_config(1000, Duration::from_millis(5000));
        let (handle, pipeline) = MetricPipeline::new(store.clone(), cfg);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(cancel.clone()));

        for i in 0..2500 {
            handle.submit(sample(i), &cancel).await.unwrap();
        }
        wait_until(|| store.write_sizes().len() >= 2).await;

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(store.write_sizes(), vec![1000, 1000, 500]);
        let stats = handle.stats();
        assert_eq!(stats.submitted, 2500);
        assert_eq!(stats.flushed_rows, 2500);
        assert_eq!(stats.flushes, 3);
        assert_eq!(stats.dropped, 0);
        assert_eq!(handle.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn requeued_samples_flush_ahead_of_new_intake() {
        let store = Arc::new(MockStore::new());
        let (_handle, pipeline) =
            MetricPipeline::new(store.clone(), test_config(10, Duration::from_secs(60)));

        let first = sample(1);
        let second = sample(2);

        store.fail_next(1);
        pipeline.batch.lock().unwrap().push(first.clone());
        assert!(pipeline.flush().await.is_err());
        assert_eq!(pipeline.requeue.lock().unwrap().len(), 1);

        pipeline.batch.lock().unwrap().push(second.clone());
        pipeline.flush().await.unwrap();

        let written = store.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], vec![first, second]);
    }

    #[tokio::test]
    async fn sixth_consecutive_failure_drops_the_batch() {
        let store = Arc::new(MockStore::new());
        let (handle, pipeline) =
            MetricPipeline::new(store.clone(), test_config(10, Duration::from_secs(60)));

        store.fail_next(6);
        for i in 0..6 {
            pipeline.batch.lock().unwrap().push(sample(i));
            assert!(pipeline.flush().await.is_err());
            if i < 5 {
                // Failures 1..=5: everything requeued, nothing dropped yet.
                assert_eq!(pipeline.requeue.lock().unwrap().len(), i as usize + 1);
                assert_eq!(handle.stats().dropped, 0);
            }
        }

        // Sixth failure: the accumulated batch is dropped, not requeued.
        assert!(pipeline.requeue.lock().unwrap().is_empty());
        assert_eq!(handle.stats().dropped, 6);
        assert_eq!(pipeline.consecutive_failures.load(Ordering::Relaxed), 6);

        // First success resets the failure counter.
        pipeline.batch.lock().unwrap().push(sample(100));
        pipeline.flush().await.unwrap();
        assert_eq!(pipeline.consecutive_failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn requeue_overflow_keeps_oldest_and_drops_newest() {
        let store = Arc::new(MockStore::new());
        let mut cfg = test_config(1, Duration::from_secs(60));
        // Allow enough consecutive failures to overflow the 10-slot buffer.
        cfg.max_consecutive_failures = 100;
        let (handle, pipeline) = MetricPipeline::new(store.clone(), cfg);

        store.fail_next(11);
        for i in 0..11 {
            pipeline.batch.lock().unwrap().push(sample(i));
            assert!(pipeline.flush().await.is_err());
        }

        // Capacity is batch_size * 10 = 10: the 11th sample (newest) fell off.
        let requeue = pipeline.requeue.lock().unwrap();
        assert_eq!(requeue.len(), 10);
        assert_eq!(requeue[0].val_used, Some(0.0));
        assert_eq!(requeue[9].val_used, Some(9.0));
        drop(requeue);
        assert_eq!(handle.stats().dropped, 1);
    }

    #[tokio::test]
    async fn full_requeue_buffer_drops_entire_batch() {
        let store = Arc::new(MockStore::new());
        let mut cfg = test_config(1, Duration::from_secs(60));
        cfg.max_consecutive_failures = 100;
        let (handle, pipeline) = MetricPipeline::new(store.clone(), cfg);

        store.fail_next(10);
        for i in 0..10 {
            pipeline.batch.lock().unwrap().push(sample(i));
            assert!(pipeline.flush().await.is_err());
        }
        assert_eq!(pipeline.requeue.lock().unwrap().len(), 10);

        pipeline.requeue_batch(vec![sample(99)]);
        assert_eq!(pipeline.requeue.lock().unwrap().len(), 10);
        assert_eq!(handle.stats().dropped, 1);
    }

    #[tokio::test]
    async fn short_insert_count_is_a_write_failure() {
        let store = Arc::new(MockStore::new());
        let (_handle, pipeline) =
            MetricPipeline::new(store.clone(), test_config(10, Duration::from_secs(60)));

        store.set_short_count(true);
        pipeline.batch.lock().unwrap().push(sample(1));
        pipeline.batch.lock().unwrap().push(sample(2));

        match pipeline.flush().await {
            Err(FlushError::CountMismatch { expected, inserted }) => {
                assert_eq!(expected, 2);
                assert_eq!(inserted, 1);
            }
            other => panic!("expected count mismatch, got {:?}", other),
        }
        assert_eq!(pipeline.requeue.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_samples() {
        let store = Arc::new(MockStore::new());
        let (handle, _pipeline) =
            MetricPipeline::new(store, test_config(10, Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        let mut bad = sample(1);
        bad.device_id = Uuid::nil();
        match handle.submit(bad, &cancel).await {
            Err(SubmitError::Invalid(SampleError::NilDeviceId)) => {}
            other => panic!("expected invalid sample, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn submit_honors_caller_cancellation_on_full_intake() {
        let store = Arc::new(MockStore::new());
        // batch_size 1 -> intake capacity 2; no loop running to drain it.
        let (handle, _pipeline) =
            MetricPipeline::new(store, test_config(1, Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        handle.submit(sample(1), &cancel).await.unwrap();
        handle.submit(sample(2), &cancel).await.unwrap();

        cancel.cancel();
        match handle.submit(sample(3), &cancel).await {
            Err(SubmitError::Cancelled) => {}
            other => panic!("expected cancelled, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn submit_fails_fast_after_pipeline_stops() {
        let store = Arc::new(MockStore::new());
        let (handle, pipeline) =
            MetricPipeline::new(store, test_config(10, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(cancel.clone()));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), PipelineState::Stopped);

        match handle.submit(sample(1), &CancellationToken::new()).await {
            Err(SubmitError::Closed) => {}
            other => panic!("expected closed, got {:?}", other.err()),
        }
    }
}
