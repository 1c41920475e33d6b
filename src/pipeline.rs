//! Parallel consumption pipeline
//!
//! A reader pulls records from the broker into a bounded channel (the
//! backpressure point), a fixed pool of workers decodes, validates, and
//! dispatches each record with retry, and a batch committer acknowledges
//! processed offsets up to the per-partition watermark.
//!
//! A record that cannot be decoded, has no handler, or exhausts its
//! handler retries is counted as failed but still committed — a single
//! bad record must never stall the partition.

use crate::broker::{BrokerConsumer, ConsumerRecord};
use crate::error::{EventError, Result};
use crate::handler::HandlerRegistry;
use crate::metrics::ConsumerMetrics;
use crate::retry;
use crate::types::{ConsumerStats, ProcessingResult, ProcessorStats};
use crate::watermark::OffsetTracker;
use chrono::Utc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Consumption pipeline configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Concurrent worker tasks
    pub worker_count: usize,

    /// Handler retry attempts after the initial call
    pub max_retries: u32,

    /// Backoff unit; the delay before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,

    /// Bounded wait per broker poll
    pub poll_timeout: Duration,

    /// Longest a completed record waits before its offset is committed
    pub commit_interval: Duration,

    /// Completions that trigger a commit before the interval elapses
    pub commit_batch_size: usize,

    /// Record channel capacity; 0 means `2 * worker_count`
    pub channel_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            poll_timeout: Duration::from_secs(1),
            commit_interval: Duration::from_secs(1),
            commit_batch_size: 100,
            channel_capacity: 0,
        }
    }
}

impl ConsumerConfig {
    /// Check the ranges the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 || self.worker_count > 100 {
            return Err(EventError::Config(
                "worker count must be between 1 and 100".to_string(),
            ));
        }
        if self.commit_batch_size == 0 {
            return Err(EventError::Config(
                "commit batch size must be positive".to_string(),
            ));
        }
        if self.poll_timeout.is_zero() || self.commit_interval.is_zero() {
            return Err(EventError::Config(
                "poll timeout and commit interval must be positive".to_string(),
            ));
        }
        if self.retry_backoff.is_zero() {
            return Err(EventError::Config(
                "retry backoff must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn resolved_channel_capacity(&self) -> usize {
        if self.channel_capacity == 0 {
            self.worker_count * 2
        } else {
            self.channel_capacity
        }
    }
}

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Closed,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Idle,
            1 => PipelineState::Running,
            2 => PipelineState::Draining,
            _ => PipelineState::Closed,
        }
    }
}

/// Both stats blocks behind the pipeline's single reader/writer lock
#[derive(Debug, Default)]
struct StatsInner {
    consumer: ConsumerStats,
    processor: ProcessorStats,
}

/// A worker-completed record position headed for the committer
#[derive(Debug, Clone, Copy)]
struct CompletedMark {
    partition: i32,
    offset: i64,
}

/// Parallel consumption pipeline over a broker consumer
pub struct ConsumerPipeline {
    consumer: Arc<dyn BrokerConsumer>,
    handlers: Arc<HandlerRegistry>,
    config: ConsumerConfig,
    metrics: Arc<dyn ConsumerMetrics>,
    state: AtomicU8,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<RwLock<StatsInner>>,
    tracker: Arc<StdMutex<OffsetTracker>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ConsumerPipeline {
    /// Validate the configuration and build an idle pipeline
    pub fn new(
        consumer: Arc<dyn BrokerConsumer>,
        handlers: HandlerRegistry,
        config: ConsumerConfig,
        metrics: Arc<dyn ConsumerMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            consumer,
            handlers: Arc::new(handlers),
            config,
            metrics,
            state: AtomicU8::new(PipelineState::Idle as u8),
            shutdown_tx,
            stats: Arc::new(RwLock::new(StatsInner::default())),
            tracker: Arc::new(StdMutex::new(OffsetTracker::new())),
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Launch the reader, worker pool, and committer
    ///
    /// Consumption continues until `close` is called.
    pub fn start(&self) -> Result<()> {
        if !self.transition(PipelineState::Idle, PipelineState::Running) {
            return Err(EventError::Config(format!(
                "pipeline cannot start from state {:?}",
                self.state()
            )));
        }

        let (record_tx, record_rx) = mpsc::channel::<ConsumerRecord>(
            self.config.resolved_channel_capacity(),
        );
        let (mark_tx, mark_rx) =
            mpsc::channel::<CompletedMark>(self.config.commit_batch_size * 2);
        let record_rx = Arc::new(Mutex::new(record_rx));

        let mut tasks = Vec::with_capacity(self.config.worker_count + 2);

        tasks.push(tokio::spawn(read_loop(
            self.consumer.clone(),
            record_tx,
            self.tracker.clone(),
            self.shutdown_tx.subscribe(),
            self.config.poll_timeout,
            self.config.retry_backoff,
            self.stats.clone(),
        )));

        for worker_id in 0..self.config.worker_count {
            tasks.push(tokio::spawn(worker_loop(
                worker_id,
                record_rx.clone(),
                mark_tx.clone(),
                self.handlers.clone(),
                self.config.max_retries,
                self.config.retry_backoff,
                self.metrics.clone(),
                self.stats.clone(),
            )));
        }
        drop(mark_tx);

        tasks.push(tokio::spawn(commit_loop(
            self.consumer.clone(),
            mark_rx,
            self.tracker.clone(),
            self.config.commit_interval,
            self.config.commit_batch_size,
            self.metrics.clone(),
        )));

        *self.tasks.lock().unwrap() = tasks;
        self.metrics.set_active_workers(self.config.worker_count);
        self.stats.write().unwrap().processor.active_workers = self.config.worker_count;

        tracing::info!(
            consumer = self.consumer.name(),
            workers = self.config.worker_count,
            commit_interval_ms = self.config.commit_interval.as_millis() as u64,
            "Consumer pipeline started"
        );
        Ok(())
    }

    /// Orderly stop: drain in-flight records, flush pending commits,
    /// release the broker consumer
    ///
    /// Idempotent; returns only after every stage has terminated.
    pub async fn close(&self) -> Result<()> {
        if self.transition(PipelineState::Running, PipelineState::Draining) {
            tracing::info!("Closing consumer pipeline, draining in-flight records");

            // The reader stops on the signal; its channel closure cascades
            // through the workers to the committer
            let _ = self.shutdown_tx.send(true);

            let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
            for task in tasks {
                if let Err(err) = task.await {
                    tracing::error!(error = %err, "Pipeline task panicked");
                }
            }

            self.metrics.set_active_workers(0);
            self.stats.write().unwrap().processor.active_workers = 0;
            self.consumer.close().await?;
            self.state
                .store(PipelineState::Closed as u8, Ordering::SeqCst);
            tracing::info!("Consumer pipeline closed");
            return Ok(());
        }

        // Closing a pipeline that never started still releases the consumer
        if self.transition(PipelineState::Idle, PipelineState::Closed) {
            self.consumer.close().await?;
        }
        Ok(())
    }

    /// Point-in-time snapshot of reader-level counters
    pub fn stats(&self) -> ConsumerStats {
        self.stats.read().unwrap().consumer.clone()
    }

    /// Point-in-time snapshot of worker-level counters
    pub fn processor_stats(&self) -> ProcessorStats {
        self.stats.read().unwrap().processor.clone()
    }
}

/// Reader stage: poll the broker, register deliveries, push to workers
async fn read_loop(
    consumer: Arc<dyn BrokerConsumer>,
    record_tx: mpsc::Sender<ConsumerRecord>,
    tracker: Arc<StdMutex<OffsetTracker>>,
    mut shutdown: watch::Receiver<bool>,
    poll_timeout: Duration,
    retry_backoff: Duration,
    stats: Arc<RwLock<StatsInner>>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            polled = consumer.poll(poll_timeout) => match polled {
                Ok(Some(record)) => {
                    {
                        let mut stats = stats.write().unwrap();
                        stats.consumer.messages_consumed += 1;
                        stats.consumer.bytes_consumed += record.payload.len() as u64;
                        stats.consumer.last_message_at = Some(Utc::now());
                    }
                    // Delivery must be registered before the record can
                    // complete, or the watermark loses its ordering
                    tracker
                        .lock()
                        .unwrap()
                        .record_delivered(record.partition, record.offset);

                    // Backpressure point: blocks when workers fall behind
                    if record_tx.send(record).await.is_err() {
                        break;
                    }
                }
                // Empty partition: the bounded wait already throttled us
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Error reading from broker");
                    stats.write().unwrap().consumer.errors += 1;
                    tokio::time::sleep(retry_backoff).await;
                }
            }
        }
    }
    tracing::info!("Reader stopped");
}

/// Worker stage: decode, validate, dispatch with retry, forward to commit
#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    record_rx: Arc<Mutex<mpsc::Receiver<ConsumerRecord>>>,
    mark_tx: mpsc::Sender<CompletedMark>,
    handlers: Arc<HandlerRegistry>,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: Arc<dyn ConsumerMetrics>,
    stats: Arc<RwLock<StatsInner>>,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let record = { record_rx.lock().await.recv().await };
        let Some(record) = record else { break };

        let mark = CompletedMark {
            partition: record.partition,
            offset: record.offset,
        };
        let result = process_record(
            &record,
            &handlers,
            max_retries,
            retry_backoff,
            metrics.as_ref(),
            &stats,
        )
        .await;

        if result.success {
            tracing::debug!(
                event_id = %result.event_id,
                duration_ms = result.duration.as_millis() as u64,
                "Event processed"
            );
        } else {
            tracing::error!(
                event_id = %result.event_id,
                partition = record.partition,
                offset = record.offset,
                error = result.error.as_deref().unwrap_or(""),
                "Event processing failed"
            );
        }

        // Failed records are committed too — failure must not stall the
        // partition
        if mark_tx.send(mark).await.is_err() {
            break;
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}

/// Process one record into a `ProcessingResult`
async fn process_record(
    record: &ConsumerRecord,
    handlers: &HandlerRegistry,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: &dyn ConsumerMetrics,
    stats: &Arc<RwLock<StatsInner>>,
) -> ProcessingResult {
    let start = Instant::now();
    let processed_at = Utc::now();

    // The wire payload is untrusted: parse and re-validate. Neither
    // failure is retried — a poison record would fail forever
    let event = match crate::broker::decode_event(record) {
        Ok(event) => event,
        Err(err) => {
            let reason = match &err {
                EventError::Serialization(_) => "parse_error",
                _ => "validation_error",
            };
            metrics.inc_failed("unknown", reason);
            {
                let mut stats = stats.write().unwrap();
                stats.consumer.errors += 1;
                stats.processor.events_failed += 1;
            }
            return ProcessingResult::failure(
                "",
                None,
                err.to_string(),
                processed_at,
                start.elapsed(),
            );
        }
    };

    let event_type = event.event_type;
    let Some(handler) = handlers.get(event_type) else {
        metrics.inc_failed(event_type.as_str(), "no_handler");
        {
            let mut stats = stats.write().unwrap();
            stats.consumer.errors += 1;
            stats.processor.events_failed += 1;
        }
        return ProcessingResult::failure(
            event.id,
            Some(event_type),
            format!("no handler for event type: {}", event_type),
            processed_at,
            start.elapsed(),
        );
    };

    let mut last_err = String::new();
    for attempt in 0..=max_retries {
        if attempt > 0 {
            metrics.inc_retry(event_type.as_str(), attempt);
            tracing::warn!(
                event_id = %event.id,
                attempt,
                "Retrying event processing"
            );
            tokio::time::sleep(retry::backoff_for(attempt, retry_backoff)).await;
        }

        match handler.handle(&event).await {
            Ok(()) => {
                metrics.inc_consumed(event_type.as_str());
                metrics.observe_processing_duration(
                    event_type.as_str(),
                    "success",
                    start.elapsed(),
                );
                {
                    let mut stats = stats.write().unwrap();
                    stats.processor.events_processed += 1;
                    *stats.processor.events_by_type.entry(event_type).or_insert(0) += 1;
                    stats.processor.last_processed_at = Some(Utc::now());
                }
                return ProcessingResult::success(&event, processed_at, start.elapsed());
            }
            Err(err) => last_err = err.to_string(),
        }
    }

    metrics.inc_failed(event_type.as_str(), "max_retries_exceeded");
    metrics.observe_processing_duration(event_type.as_str(), "failed", start.elapsed());
    {
        let mut stats = stats.write().unwrap();
        stats.consumer.errors += 1;
        stats.processor.events_failed += 1;
    }
    ProcessingResult::failure(
        event.id,
        Some(event_type),
        format!("max retries exceeded: {}", last_err),
        processed_at,
        start.elapsed(),
    )
}

/// Committer stage: fold completions into the watermark, commit on batch
/// size or interval
async fn commit_loop(
    consumer: Arc<dyn BrokerConsumer>,
    mut mark_rx: mpsc::Receiver<CompletedMark>,
    tracker: Arc<StdMutex<OffsetTracker>>,
    commit_interval: Duration,
    commit_batch_size: usize,
    metrics: Arc<dyn ConsumerMetrics>,
) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + commit_interval,
        commit_interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            mark = mark_rx.recv() => match mark {
                Some(mark) => {
                    let pending = {
                        let mut tracker = tracker.lock().unwrap();
                        tracker.record_completed(mark.partition, mark.offset);
                        tracker.pending()
                    };
                    if pending >= commit_batch_size {
                        flush_commits(consumer.as_ref(), &tracker, metrics.as_ref()).await;
                    }
                }
                None => {
                    tracing::info!("Commit channel closed, committing final batch");
                    flush_commits(consumer.as_ref(), &tracker, metrics.as_ref()).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush_commits(consumer.as_ref(), &tracker, metrics.as_ref()).await;
            }
        }
    }
    tracing::info!("Committer stopped");
}

/// Commit up to the watermark; failures are logged, not retried
async fn flush_commits(
    consumer: &dyn BrokerConsumer,
    tracker: &Arc<StdMutex<OffsetTracker>>,
    metrics: &dyn ConsumerMetrics,
) {
    let marks = tracker.lock().unwrap().committable();
    if marks.is_empty() {
        return;
    }

    let start = Instant::now();
    match consumer.commit(&marks).await {
        Ok(()) => {
            metrics.observe_commit_duration(start.elapsed());
            metrics.observe_commit_batch_size(marks.len());
            tracing::debug!(partitions = marks.len(), "Offsets committed");
        }
        Err(err) => {
            // The next successful cycle advances durably; a failed attempt
            // only risks re-delivery, never loss
            tracing::error!(error = %err, "Failed to commit offsets");
        }
    }
}
