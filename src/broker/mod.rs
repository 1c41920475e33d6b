//! Broker transport seam — the core abstraction for broker backends
//!
//! Both pipeline halves talk to the broker through these traits. The
//! `kafka` backend is the production transport; the `memory` backend backs
//! tests, benchmarks, and single-process use.

use crate::error::Result;
use crate::types::Event;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod kafka;
pub mod memory;

/// A record headed to the broker
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    /// Record key — the event id, for partition affinity
    pub key: String,

    /// Serialized event payload
    pub payload: Bytes,

    /// Routing headers, readable without deserializing the payload
    pub headers: Vec<(String, String)>,

    /// Event creation time, carried as the record timestamp
    pub timestamp: DateTime<Utc>,
}

/// A record read from the broker
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    /// Record key, when the broker delivered one
    pub key: Option<String>,

    /// Untrusted payload bytes
    pub payload: Bytes,

    /// Partition the record came from
    pub partition: i32,

    /// Offset of the record within its partition
    pub offset: i64,
}

/// A position to acknowledge to the broker
///
/// `next_offset` is the next offset to *read* (Kafka commit semantics),
/// i.e. one past the last fully-processed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetMark {
    pub partition: i32,
    pub next_offset: i64,
}

/// Serialize an event into a broker record
///
/// Headers redundantly carry the routing metadata (`event-type`,
/// `event-id`, `event-version`, `event-source`) so consumers can filter
/// without a full deserialization; absent provenance becomes an empty
/// header value.
pub fn encode_event(event: &Event) -> Result<ProducerRecord> {
    let payload = event.to_payload()?;
    Ok(ProducerRecord {
        key: event.id.clone(),
        payload: payload.into(),
        headers: vec![
            ("event-type".to_string(), event.event_type.to_string()),
            ("event-id".to_string(), event.id.clone()),
            (
                "event-version".to_string(),
                event.version.clone().unwrap_or_default(),
            ),
            (
                "event-source".to_string(),
                event.source.clone().unwrap_or_default(),
            ),
        ],
        timestamp: event.timestamp,
    })
}

/// Parse and validate an event from a consumed record
pub fn decode_event(record: &ConsumerRecord) -> Result<Event> {
    Event::from_payload(&record.payload)
}

/// Write half of a broker backend
///
/// One `write` call carries one publisher batch; the batch either reaches
/// the broker as a whole or the call errors.
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// Write a batch of records, returning once the broker acknowledges
    async fn write(&self, records: Vec<ProducerRecord>) -> Result<()>;

    /// Flush outstanding deliveries and release broker resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name (e.g. "kafka", "memory")
    fn name(&self) -> &str;
}

/// Read half of a broker backend
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Pull the next record, waiting at most `max_wait`
    ///
    /// Returns `Ok(None)` when the wait elapses on an empty partition —
    /// a timeout is not an error.
    async fn poll(&self, max_wait: Duration) -> Result<Option<ConsumerRecord>>;

    /// Acknowledge processed positions to the broker
    async fn commit(&self, marks: &[OffsetMark]) -> Result<()>;

    /// Release broker resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name (e.g. "kafka", "memory")
    fn name(&self) -> &str;
}
