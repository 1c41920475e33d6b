//! Metrics seams for the pipeline stages
//!
//! Every stage takes an explicit metrics object — there is no global
//! registry. Implementations are called synchronously from hot paths and
//! must not block; anything slower than a counter bump belongs behind a
//! buffer in the implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metrics emitted by the batching publisher
pub trait PublisherMetrics: Send + Sync {
    /// An event was confirmed written to the broker
    fn inc_published(&self, event_type: &str);

    /// An event failed (validation, serialization, queue overflow, or
    /// publish after retry exhaustion)
    fn inc_failed(&self, event_type: &str, reason: &str);

    /// A broker write attempt failed and will be retried
    fn inc_write_retry(&self);

    /// Wall time of one `publish` call
    fn observe_publish_duration(&self, event_type: &str, duration: Duration);

    /// Wall time of one batch flush, retries included
    fn observe_batch_flush_duration(&self, duration: Duration);

    /// Size of a flushed batch
    fn observe_batch_size(&self, size: usize);

    /// An event entered the internal queue
    fn inc_buffered(&self);

    /// An event left the internal queue
    fn dec_buffered(&self);
}

/// Metrics emitted by the consumption pipeline
pub trait ConsumerMetrics: Send + Sync {
    /// A record was processed successfully
    fn inc_consumed(&self, event_type: &str);

    /// A record failed (parse, validation, missing handler, or handler
    /// retry exhaustion)
    fn inc_failed(&self, event_type: &str, reason: &str);

    /// A handler call is being retried
    fn inc_retry(&self, event_type: &str, attempt: u32);

    /// Wall time of processing one record, labeled by outcome
    fn observe_processing_duration(&self, event_type: &str, outcome: &str, duration: Duration);

    /// Wall time of one offset commit
    fn observe_commit_duration(&self, duration: Duration);

    /// Completions folded into one commit
    fn observe_commit_batch_size(&self, size: usize);

    /// Number of workers currently running
    fn set_active_workers(&self, count: usize);
}

/// Metrics sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl PublisherMetrics for NoopMetrics {
    fn inc_published(&self, _event_type: &str) {}
    fn inc_failed(&self, _event_type: &str, _reason: &str) {}
    fn inc_write_retry(&self) {}
    fn observe_publish_duration(&self, _event_type: &str, _duration: Duration) {}
    fn observe_batch_flush_duration(&self, _duration: Duration) {}
    fn observe_batch_size(&self, _size: usize) {}
    fn inc_buffered(&self) {}
    fn dec_buffered(&self) {}
}

impl ConsumerMetrics for NoopMetrics {
    fn inc_consumed(&self, _event_type: &str) {}
    fn inc_failed(&self, _event_type: &str, _reason: &str) {}
    fn inc_retry(&self, _event_type: &str, _attempt: u32) {}
    fn observe_processing_duration(&self, _event_type: &str, _outcome: &str, _duration: Duration) {}
    fn observe_commit_duration(&self, _duration: Duration) {}
    fn observe_commit_batch_size(&self, _size: usize) {}
    fn set_active_workers(&self, _count: usize) {}
}

/// In-memory metrics for tests and embedded stats endpoints
///
/// Counters are atomics; labeled counts live behind short-lived mutexes.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    published: Mutex<HashMap<String, u64>>,
    consumed: Mutex<HashMap<String, u64>>,
    failed: Mutex<HashMap<(String, String), u64>>,
    retries: AtomicU64,
    write_retries: AtomicU64,
    buffered: AtomicI64,
    active_workers: AtomicUsize,
    batches: AtomicU64,
    commit_batches: AtomicU64,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published count for one event type
    pub fn published(&self, event_type: &str) -> u64 {
        *self.published.lock().unwrap().get(event_type).unwrap_or(&0)
    }

    /// Total published count across types
    pub fn published_total(&self) -> u64 {
        self.published.lock().unwrap().values().sum()
    }

    /// Consumed count for one event type
    pub fn consumed(&self, event_type: &str) -> u64 {
        *self.consumed.lock().unwrap().get(event_type).unwrap_or(&0)
    }

    /// Failure count for one (type, reason) pair
    pub fn failed(&self, event_type: &str, reason: &str) -> u64 {
        *self
            .failed
            .lock()
            .unwrap()
            .get(&(event_type.to_string(), reason.to_string()))
            .unwrap_or(&0)
    }

    /// Total failure count across types and reasons
    pub fn failed_total(&self) -> u64 {
        self.failed.lock().unwrap().values().sum()
    }

    /// Handler retry attempts observed
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Failed broker write attempts observed
    pub fn write_retries(&self) -> u64 {
        self.write_retries.load(Ordering::Relaxed)
    }

    /// Current buffered-events gauge
    pub fn buffered(&self) -> i64 {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Current active-workers gauge
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Publisher batches flushed
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Offset commit batches observed
    pub fn commit_batches(&self) -> u64 {
        self.commit_batches.load(Ordering::Relaxed)
    }
}

impl PublisherMetrics for MemoryMetrics {
    fn inc_published(&self, event_type: &str) {
        *self
            .published
            .lock()
            .unwrap()
            .entry(event_type.to_string())
            .or_insert(0) += 1;
    }

    fn inc_failed(&self, event_type: &str, reason: &str) {
        *self
            .failed
            .lock()
            .unwrap()
            .entry((event_type.to_string(), reason.to_string()))
            .or_insert(0) += 1;
    }

    fn inc_write_retry(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_publish_duration(&self, _event_type: &str, _duration: Duration) {}

    fn observe_batch_flush_duration(&self, _duration: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_batch_size(&self, _size: usize) {}

    fn inc_buffered(&self) {
        self.buffered.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_buffered(&self) {
        self.buffered.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConsumerMetrics for MemoryMetrics {
    fn inc_consumed(&self, event_type: &str) {
        *self
            .consumed
            .lock()
            .unwrap()
            .entry(event_type.to_string())
            .or_insert(0) += 1;
    }

    fn inc_failed(&self, event_type: &str, reason: &str) {
        *self
            .failed
            .lock()
            .unwrap()
            .entry((event_type.to_string(), reason.to_string()))
            .or_insert(0) += 1;
    }

    fn inc_retry(&self, _event_type: &str, _attempt: u32) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_processing_duration(&self, _event_type: &str, _outcome: &str, _duration: Duration) {}

    fn observe_commit_duration(&self, _duration: Duration) {}

    fn observe_commit_batch_size(&self, _size: usize) {
        self.commit_batches.fetch_add(1, Ordering::Relaxed);
    }

    fn set_active_workers(&self, count: usize) {
        self.active_workers.store(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_metrics_counters() {
        let metrics = MemoryMetrics::new();

        PublisherMetrics::inc_published(&metrics, "user_created");
        PublisherMetrics::inc_published(&metrics, "user_created");
        PublisherMetrics::inc_published(&metrics, "order_placed");

        assert_eq!(metrics.published("user_created"), 2);
        assert_eq!(metrics.published("order_placed"), 1);
        assert_eq!(metrics.published_total(), 3);
        assert_eq!(metrics.published("payment_processed"), 0);
    }

    #[test]
    fn test_memory_metrics_failures_by_reason() {
        let metrics = MemoryMetrics::new();

        ConsumerMetrics::inc_failed(&metrics, "user_created", "parse_error");
        ConsumerMetrics::inc_failed(&metrics, "user_created", "max_retries_exceeded");
        ConsumerMetrics::inc_failed(&metrics, "user_created", "max_retries_exceeded");

        assert_eq!(metrics.failed("user_created", "parse_error"), 1);
        assert_eq!(metrics.failed("user_created", "max_retries_exceeded"), 2);
        assert_eq!(metrics.failed_total(), 3);
    }

    #[test]
    fn test_memory_metrics_buffered_gauge() {
        let metrics = MemoryMetrics::new();
        metrics.inc_buffered();
        metrics.inc_buffered();
        metrics.dec_buffered();
        assert_eq!(metrics.buffered(), 1);
    }

    #[test]
    fn test_memory_metrics_workers_gauge() {
        let metrics = MemoryMetrics::new();
        metrics.set_active_workers(5);
        assert_eq!(metrics.active_workers(), 5);
        metrics.set_active_workers(0);
        assert_eq!(metrics.active_workers(), 0);
    }

    #[test]
    fn test_noop_metrics_accepts_everything() {
        let metrics = NoopMetrics;
        PublisherMetrics::inc_published(&metrics, "user_created");
        PublisherMetrics::inc_failed(&metrics, "user_created", "publish_error");
        ConsumerMetrics::inc_consumed(&metrics, "order_placed");
        metrics.observe_commit_duration(Duration::from_millis(1));
        metrics.set_active_workers(3);
    }
}
