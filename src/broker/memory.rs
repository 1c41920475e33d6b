//! In-memory broker backend
//!
//! A partitioned in-process log for tests, benchmarks, and single-process
//! use. Every `write` call is captured as one batch and committed offsets
//! are queryable, so delivery behavior is observable from the outside.

use super::{BrokerConsumer, BrokerWriter, ConsumerRecord, OffsetMark, ProducerRecord};
use crate::error::{EventError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    /// Per-partition record log
    log: Mutex<Vec<Vec<ProducerRecord>>>,

    /// Every `write` call, captured as one batch
    writes: Mutex<Vec<Vec<ProducerRecord>>>,

    /// Committed next-offset per partition
    committed: Mutex<HashMap<i32, i64>>,

    /// Writes left to fail (failure injection)
    fail_writes: AtomicUsize,

    /// Wakes consumers blocked in `poll`
    notify: Notify,
}

/// In-memory partitioned broker
///
/// Clone-cheap handle; `writer()` and `consumer()` hand out the two trait
/// halves over the same shared log.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
    partitions: usize,
}

impl MemoryBroker {
    /// Create a single-partition broker
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Create a broker with `partitions` partitions, keyed by record key
    pub fn with_partitions(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let shared = Shared {
            log: Mutex::new(vec![Vec::new(); partitions]),
            ..Default::default()
        };
        Self {
            shared: Arc::new(shared),
            partitions,
        }
    }

    /// Get a writer handle
    pub fn writer(&self) -> MemoryWriter {
        MemoryWriter {
            broker: self.clone(),
        }
    }

    /// Get a consumer handle with its own read cursor, starting at the
    /// beginning of every partition
    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            positions: Mutex::new(vec![0; self.partitions]),
        }
    }

    /// Fail the next `n` write calls with a publish error
    pub fn fail_next_writes(&self, n: usize) {
        self.shared.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Every write call so far, each as one captured batch
    pub fn writes(&self) -> Vec<Vec<ProducerRecord>> {
        self.shared.writes.lock().unwrap().clone()
    }

    /// Total records across partitions
    pub fn record_count(&self) -> usize {
        self.shared.log.lock().unwrap().iter().map(Vec::len).sum()
    }

    /// Committed next-offset for a partition, if anything was committed
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.shared.committed.lock().unwrap().get(&partition).copied()
    }

    fn partition_for(&self, key: &str) -> usize {
        let hash = key
            .bytes()
            .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
        (hash % self.partitions as u64) as usize
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half of `MemoryBroker`
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerWriter for MemoryWriter {
    async fn write(&self, records: Vec<ProducerRecord>) -> Result<()> {
        let shared = &self.broker.shared;

        if shared
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EventError::Publish {
                topic: "memory".to_string(),
                reason: "injected write failure".to_string(),
            });
        }

        {
            let mut log = shared.log.lock().unwrap();
            for record in &records {
                let partition = self.broker.partition_for(&record.key);
                log[partition].push(record.clone());
            }
        }
        shared.writes.lock().unwrap().push(records);
        shared.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Read half of `MemoryBroker`
#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    positions: Mutex<Vec<usize>>,
}

impl MemoryConsumer {
    fn try_next(&self) -> Option<ConsumerRecord> {
        let log = self.broker.shared.log.lock().unwrap();
        let mut positions = self.positions.lock().unwrap();

        for (partition, records) in log.iter().enumerate() {
            let cursor = positions[partition];
            if cursor < records.len() {
                let record = &records[cursor];
                positions[partition] += 1;
                return Some(ConsumerRecord {
                    key: Some(record.key.clone()),
                    payload: record.payload.clone(),
                    partition: partition as i32,
                    offset: cursor as i64,
                });
            }
        }
        None
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn poll(&self, max_wait: Duration) -> Result<Option<ConsumerRecord>> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            // Register for wakeups before checking, so a write landing
            // between the check and the await is not missed
            let notified = self.broker.shared.notify.notified();
            if let Some(record) = self.try_next() {
                return Ok(Some(record));
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn commit(&self, marks: &[OffsetMark]) -> Result<()> {
        let mut committed = self.broker.shared.committed.lock().unwrap();
        for mark in marks {
            let entry = committed.entry(mark.partition).or_insert(0);
            *entry = (*entry).max(mark.next_offset);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::encode_event;
    use crate::types::{Event, EventType};

    fn record(data: &str) -> ProducerRecord {
        encode_event(&Event::new(EventType::UserCreated, data)).unwrap()
    }

    #[tokio::test]
    async fn test_write_then_poll() {
        let broker = MemoryBroker::new();
        let writer = broker.writer();
        let consumer = broker.consumer();

        writer.write(vec![record("a")]).await.unwrap();

        let polled = consumer
            .poll(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(polled.partition, 0);
        assert_eq!(polled.offset, 0);
        assert!(polled.key.is_some());
    }

    #[tokio::test]
    async fn test_poll_timeout_returns_none() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer();

        let polled = consumer.poll(Duration::from_millis(20)).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_late_write() {
        let broker = MemoryBroker::new();
        let writer = broker.writer();
        let consumer = broker.consumer();

        let write = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.write(vec![record("late")]).await.unwrap();
        });

        let polled = consumer.poll(Duration::from_secs(2)).await.unwrap();
        assert!(polled.is_some());
        write.await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_captured_per_batch() {
        let broker = MemoryBroker::new();
        let writer = broker.writer();

        writer.write(vec![record("a"), record("b")]).await.unwrap();
        writer.write(vec![record("c")]).await.unwrap();

        let writes = broker.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), 2);
        assert_eq!(writes[1].len(), 1);
        assert_eq!(broker.record_count(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let broker = MemoryBroker::new();
        let writer = broker.writer();
        broker.fail_next_writes(2);

        assert!(writer.write(vec![record("a")]).await.is_err());
        assert!(writer.write(vec![record("b")]).await.is_err());
        assert!(writer.write(vec![record("c")]).await.is_ok());
        assert_eq!(broker.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_tracks_highest_offset() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer();

        assert_eq!(broker.committed(0), None);
        consumer
            .commit(&[OffsetMark { partition: 0, next_offset: 3 }])
            .await
            .unwrap();
        consumer
            .commit(&[OffsetMark { partition: 0, next_offset: 2 }])
            .await
            .unwrap();

        // Commits never move backwards
        assert_eq!(broker.committed(0), Some(3));
    }

    #[tokio::test]
    async fn test_key_partitioning_is_stable() {
        let broker = MemoryBroker::with_partitions(4);
        let writer = broker.writer();
        let consumer = broker.consumer();

        let event = Event::new(EventType::OrderPlaced, "x");
        let first = encode_event(&event).unwrap();
        let second = encode_event(&event).unwrap();
        writer.write(vec![first, second]).await.unwrap();

        let a = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        let b = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();

        // Same key lands on the same partition with sequential offsets
        assert_eq!(a.partition, b.partition);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 1);
    }

    #[tokio::test]
    async fn test_consumers_have_independent_cursors() {
        let broker = MemoryBroker::new();
        let writer = broker.writer();
        writer.write(vec![record("a")]).await.unwrap();

        let first = broker.consumer();
        let second = broker.consumer();

        assert!(first.poll(Duration::from_millis(50)).await.unwrap().is_some());
        assert!(second.poll(Duration::from_millis(50)).await.unwrap().is_some());
        assert!(first.poll(Duration::from_millis(20)).await.unwrap().is_none());
    }
}
