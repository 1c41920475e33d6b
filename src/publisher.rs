//! Asynchronous batching publisher
//!
//! `publish` accepts one event at a time and returns as soon as the event
//! is in the pending batch. A collector task groups events and flushes on
//! size or on a timer; a sender task turns each batch into one broker
//! write with retry. When the internal queue is full, `publish` falls back
//! to a synchronous single-event send so nothing is dropped silently.
//!
//! Delivery is best-effort from the caller's point of view: once an event
//! is accepted into a batch, a later broker failure surfaces only through
//! metrics and logs.

use crate::broker::{encode_event, BrokerWriter, ProducerRecord};
use crate::error::{EventError, Result};
use crate::metrics::PublisherMetrics;
use crate::retry;
use crate::types::{Event, PublisherStats};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Batches queued between the collector and the sender
const BATCH_QUEUE_CAPACITY: usize = 10;

/// Batching publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Events per batch before a size-triggered flush
    pub batch_size: usize,

    /// Longest an event waits in a partial batch before a timer flush
    pub batch_timeout: Duration,

    /// Retry attempts after the initial broker write
    pub max_retries: u32,

    /// Backoff unit; the delay before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,

    /// Event queue capacity; 0 means `2 * batch_size`
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            queue_capacity: 0,
        }
    }
}

impl PublisherConfig {
    /// Check the ranges the publisher relies on
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EventError::Config("batch size must be positive".to_string()));
        }
        if self.batch_timeout.is_zero() {
            return Err(EventError::Config(
                "batch timeout must be positive".to_string(),
            ));
        }
        if self.retry_backoff.is_zero() {
            return Err(EventError::Config(
                "retry backoff must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn resolved_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            self.batch_size * 2
        } else {
            self.queue_capacity
        }
    }
}

/// Asynchronous batching publisher over a broker writer
pub struct BatchingPublisher {
    event_tx: RwLock<Option<mpsc::Sender<Event>>>,
    writer: Arc<dyn BrokerWriter>,
    config: PublisherConfig,
    metrics: Arc<dyn PublisherMetrics>,
    stats: Arc<RwLock<PublisherStats>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BatchingPublisher {
    /// Validate the configuration and launch the collector and sender
    pub fn start(
        writer: Arc<dyn BrokerWriter>,
        config: PublisherConfig,
        metrics: Arc<dyn PublisherMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.resolved_queue_capacity());
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_CAPACITY);
        let stats = Arc::new(RwLock::new(PublisherStats::default()));

        let collector = tokio::spawn(collect_batches(
            event_rx,
            batch_tx,
            config.batch_size,
            config.batch_timeout,
            metrics.clone(),
            stats.clone(),
        ));
        let sender = tokio::spawn(send_batches(
            batch_rx,
            writer.clone(),
            config.max_retries,
            config.retry_backoff,
            metrics.clone(),
            stats.clone(),
        ));

        tracing::info!(
            writer = writer.name(),
            batch_size = config.batch_size,
            batch_timeout_ms = config.batch_timeout.as_millis() as u64,
            "Batching publisher started"
        );

        Ok(Self {
            event_tx: RwLock::new(Some(event_tx)),
            writer,
            config,
            metrics,
            stats,
            tasks: Mutex::new(vec![collector, sender]),
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueue a validated event for asynchronous delivery
    ///
    /// Returns once the event is accepted into the pending batch, not
    /// after broker acknowledgement. When the queue is full the event is
    /// sent synchronously instead, making this call block for the write.
    pub async fn publish(&self, event: Event) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventError::Closed("publisher"));
        }

        let start = Instant::now();
        let event_type = event.event_type.as_str();

        if let Err(err) = event.validate() {
            self.metrics.inc_failed(event_type, "validation_error");
            return Err(err.into());
        }

        let sender = self.event_tx.read().unwrap().clone();
        let Some(sender) = sender else {
            return Err(EventError::Closed("publisher"));
        };

        let result = match sender.try_send(event) {
            Ok(()) => {
                self.metrics.inc_buffered();
                self.stats.write().unwrap().events_enqueued += 1;
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    event_id = %event.id,
                    "Event queue full, sending synchronously"
                );
                self.stats.write().unwrap().sync_fallbacks += 1;
                self.publish_sync(event).await
            }
            Err(TrySendError::Closed(_)) => Err(EventError::Closed("publisher")),
        };

        self.metrics
            .observe_publish_duration(event_type, start.elapsed());
        result
    }

    /// Synchronous single-event fallback for a full queue
    async fn publish_sync(&self, event: Event) -> Result<()> {
        let event_type = event.event_type.as_str();

        let record = match encode_event(&event) {
            Ok(record) => record,
            Err(err) => {
                self.metrics.inc_failed(event_type, "serialization_error");
                self.stats.write().unwrap().events_failed += 1;
                return Err(err);
            }
        };

        match write_with_retry(
            self.writer.as_ref(),
            vec![record],
            self.config.max_retries,
            self.config.retry_backoff,
            self.metrics.as_ref(),
        )
        .await
        {
            Ok(()) => {
                self.metrics.inc_published(event_type);
                let mut stats = self.stats.write().unwrap();
                stats.events_published += 1;
                stats.last_publish_at = Some(Utc::now());
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_failed(event_type, "publish_error");
                self.stats.write().unwrap().events_failed += 1;
                Err(err)
            }
        }
    }

    /// Drain the queue, flush the partial batch, and release the writer
    ///
    /// Idempotent; does not return until every previously-enqueued event
    /// has been flushed or has failed permanently.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Closing publisher");

        // Dropping the event sender closes the channel; the collector
        // flushes its final batch and closure cascades to the sender
        self.event_tx.write().unwrap().take();

        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Publisher task panicked");
            }
        }

        self.writer.close().await?;
        tracing::info!("Publisher closed");
        Ok(())
    }

    /// Point-in-time snapshot of publisher counters
    pub fn stats(&self) -> PublisherStats {
        self.stats.read().unwrap().clone()
    }
}

/// Collector stage: group events into batches, flush on size or timer
async fn collect_batches(
    mut event_rx: mpsc::Receiver<Event>,
    batch_tx: mpsc::Sender<Vec<Event>>,
    batch_size: usize,
    batch_timeout: Duration,
    metrics: Arc<dyn PublisherMetrics>,
    stats: Arc<RwLock<PublisherStats>>,
) {
    let mut current = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + batch_timeout,
        batch_timeout,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => {
                    metrics.dec_buffered();
                    current.push(event);
                    if current.len() >= batch_size {
                        flush_batch(&mut current, &batch_tx, batch_size, &metrics, &stats);
                    }
                }
                None => {
                    tracing::info!("Event channel closed, flushing final batch");
                    flush_batch(&mut current, &batch_tx, batch_size, &metrics, &stats);
                    break;
                }
            },
            _ = ticker.tick() => {
                flush_batch(&mut current, &batch_tx, batch_size, &metrics, &stats);
            }
        }
    }
    // batch_tx drops here, letting the sender drain and stop
}

/// Hand the current batch to the sender stage
fn flush_batch(
    current: &mut Vec<Event>,
    batch_tx: &mpsc::Sender<Vec<Event>>,
    batch_size: usize,
    metrics: &Arc<dyn PublisherMetrics>,
    stats: &Arc<RwLock<PublisherStats>>,
) {
    if current.is_empty() {
        return;
    }

    let batch = std::mem::replace(current, Vec::with_capacity(batch_size));
    let len = batch.len();

    match batch_tx.try_send(batch) {
        Ok(()) => {
            tracing::debug!(batch_size = len, "Batch queued for sending");
        }
        Err(TrySendError::Full(batch)) | Err(TrySendError::Closed(batch)) => {
            tracing::warn!(batch_size = len, "Batch queue unavailable, dropping batch");
            for event in &batch {
                metrics.inc_failed(event.event_type.as_str(), "batch_queue_full");
            }
            stats.write().unwrap().events_failed += len as u64;
        }
    }
}

/// Sender stage: one broker write per batch, with retry
async fn send_batches(
    mut batch_rx: mpsc::Receiver<Vec<Event>>,
    writer: Arc<dyn BrokerWriter>,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: Arc<dyn PublisherMetrics>,
    stats: Arc<RwLock<PublisherStats>>,
) {
    while let Some(batch) = batch_rx.recv().await {
        let len = batch.len();
        let start = Instant::now();

        send_batch(
            batch,
            writer.as_ref(),
            max_retries,
            retry_backoff,
            metrics.as_ref(),
            &stats,
        )
        .await;

        metrics.observe_batch_flush_duration(start.elapsed());
        metrics.observe_batch_size(len);
    }
    tracing::info!("Batch queue closed, sender stopped");
}

/// Serialize the batch members and perform one broker write
///
/// Members failing validation or serialization are dropped with a recorded
/// reason and do not block the rest of the batch.
async fn send_batch(
    batch: Vec<Event>,
    writer: &dyn BrokerWriter,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: &dyn PublisherMetrics,
    stats: &Arc<RwLock<PublisherStats>>,
) {
    let mut records: Vec<ProducerRecord> = Vec::with_capacity(batch.len());
    let mut members: Vec<Event> = Vec::with_capacity(batch.len());

    for event in batch {
        if let Err(err) = event.validate() {
            metrics.inc_failed(event.event_type.as_str(), "validation_error");
            stats.write().unwrap().events_failed += 1;
            tracing::error!(
                event_id = %event.id,
                field = err.field(),
                error = %err,
                "Event validation failed, dropped from batch"
            );
            continue;
        }
        match encode_event(&event) {
            Ok(record) => {
                records.push(record);
                members.push(event);
            }
            Err(err) => {
                metrics.inc_failed(event.event_type.as_str(), "serialization_error");
                stats.write().unwrap().events_failed += 1;
                tracing::error!(
                    event_id = %event.id,
                    error = %err,
                    "Event serialization failed, dropped from batch"
                );
            }
        }
    }

    if records.is_empty() {
        return;
    }

    match write_with_retry(writer, records, max_retries, retry_backoff, metrics).await {
        Ok(()) => {
            for event in &members {
                metrics.inc_published(event.event_type.as_str());
            }
            let mut stats = stats.write().unwrap();
            stats.events_published += members.len() as u64;
            stats.batches_sent += 1;
            stats.last_publish_at = Some(Utc::now());
            tracing::debug!(batch_size = members.len(), "Batch sent");
        }
        Err(err) => {
            for event in &members {
                metrics.inc_failed(event.event_type.as_str(), "publish_error");
            }
            stats.write().unwrap().events_failed += members.len() as u64;
            tracing::error!(
                batch_size = members.len(),
                error = %err,
                "Failed to send batch"
            );
        }
    }
}

/// Perform a broker write with linear backoff between attempts
async fn write_with_retry(
    writer: &dyn BrokerWriter,
    records: Vec<ProducerRecord>,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: &dyn PublisherMetrics,
) -> Result<()> {
    let mut last_err = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(retry::backoff_for(attempt, retry_backoff)).await;
        }

        match writer.write(records.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                metrics.inc_write_retry();
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %err,
                    "Broker write failed"
                );
                last_err = err.to_string();
            }
        }
    }

    Err(EventError::RetriesExhausted {
        attempts: max_retries + 1,
        last: last_err,
    })
}
