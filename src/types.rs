//! Core event types for the delivery pipeline
//!
//! The wire representation is a flat JSON object
//! `{id, type, data, timestamp, version, source}` — `version` and `source`
//! are omitted when absent, `timestamp` is RFC 3339.

use crate::error::{Result, ValidationError};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Maximum payload size accepted by validation
pub const MAX_DATA_BYTES: usize = 10_000;

/// How far in the future an event timestamp may lie before validation
/// rejects it (clock skew allowance)
const FUTURE_TOLERANCE_SECS: i64 = 300;

/// Closed set of event types routed by the pipeline
///
/// Each type maps to exactly one registered handler on the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserCreated,
    OrderPlaced,
    PaymentProcessed,
}

impl EventType {
    /// All known event types
    pub fn all() -> [EventType; 3] {
        [
            EventType::UserCreated,
            EventType::OrderPlaced,
            EventType::PaymentProcessed,
        ]
    }

    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "user_created",
            EventType::OrderPlaced => "order_placed",
            EventType::PaymentProcessed => "payment_processed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user_created" => Ok(EventType::UserCreated),
            "order_placed" => Ok(EventType::OrderPlaced),
            "payment_processed" => Ok(EventType::PaymentProcessed),
            other => Err(ValidationError::UnknownType(other.to_string())),
        }
    }
}

/// A domain event — the unit of transport
///
/// Immutable once created; the pipeline treats `data` as opaque bytes
/// and leaves interpretation to the per-type handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier (`<type>_<timestamp>_<suffix>`)
    pub id: String,

    /// Event type, governs handler routing
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Opaque payload, 1–10_000 bytes
    pub data: String,

    /// Creation time (UTC)
    pub timestamp: DateTime<Utc>,

    /// Optional producer schema version, carried through unaltered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Optional producing system, carried through unaltered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Untrusted wire shape — `type` arrives as a plain string so an unknown
/// type surfaces as a validation error rather than a parse error
#[derive(Deserialize)]
struct WireEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

impl Event {
    /// Create a new event with a generated id and the current timestamp
    pub fn new(event_type: EventType, data: impl Into<String>) -> Self {
        Self {
            id: generate_event_id(event_type),
            event_type,
            data: data.into(),
            timestamp: Utc::now(),
            version: None,
            source: None,
        }
    }

    /// Set the schema version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the producing system
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Validate the event's structural invariants
    ///
    /// Applied on the publish path before serialization and again on the
    /// consume path after deserialization, since the wire representation
    /// is untrusted.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.data.is_empty() {
            return Err(ValidationError::EmptyData);
        }
        if self.data.len() > MAX_DATA_BYTES {
            return Err(ValidationError::DataTooLong {
                len: self.data.len(),
                max: MAX_DATA_BYTES,
            });
        }
        if self.timestamp.timestamp() <= 0 {
            return Err(ValidationError::ZeroTimestamp);
        }
        if self.timestamp > Utc::now() + TimeDelta::seconds(FUTURE_TOLERANCE_SECS) {
            return Err(ValidationError::FutureTimestamp);
        }
        Ok(())
    }

    /// Serialize to the wire payload
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate an event from an untrusted wire payload
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let wire: WireEvent = serde_json::from_slice(payload)?;
        let event_type = wire.event_type.parse::<EventType>()?;

        let event = Event {
            id: wire.id,
            event_type,
            data: wire.data,
            timestamp: wire.timestamp,
            version: wire.version,
            source: wire.source,
        };
        event.validate()?;
        Ok(event)
    }
}

/// Generate an event id of the form `<type>_<yyyymmddhhmmss>_<suffix>`
fn generate_event_id(event_type: EventType) -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", event_type, stamp, &suffix[..8])
}

/// Outcome of handling one event
///
/// Built by a worker, handed to logging/metrics, never mutated.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Id of the processed event (empty when the record never parsed)
    pub event_id: String,

    /// Type of the processed event, when known
    pub event_type: Option<EventType>,

    /// Whether processing succeeded
    pub success: bool,

    /// Failure description for unsuccessful results
    pub error: Option<String>,

    /// When processing started
    pub processed_at: DateTime<Utc>,

    /// How long processing took, retries included
    pub duration: Duration,
}

impl ProcessingResult {
    /// Build a success result
    pub fn success(event: &Event, processed_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: Some(event.event_type),
            success: true,
            error: None,
            processed_at,
            duration,
        }
    }

    /// Build a failure result
    pub fn failure(
        event_id: impl Into<String>,
        event_type: Option<EventType>,
        error: impl Into<String>,
        processed_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            success: false,
            error: Some(error.into()),
            processed_at,
            duration,
        }
    }
}

/// Reader-level counters, snapshot via `ConsumerPipeline::stats`
#[derive(Debug, Clone, Default)]
pub struct ConsumerStats {
    /// Records pulled from the broker
    pub messages_consumed: u64,

    /// Payload bytes pulled from the broker
    pub bytes_consumed: u64,

    /// Read, parse, validation, and processing errors
    pub errors: u64,

    /// When the last record was read
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Worker-level counters, snapshot via `ConsumerPipeline::processor_stats`
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Events handled successfully
    pub events_processed: u64,

    /// Events that failed parse, validation, or handling
    pub events_failed: u64,

    /// Successful events per type
    pub events_by_type: HashMap<EventType, u64>,

    /// Workers currently running
    pub active_workers: usize,

    /// When the last event finished processing
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Publisher-side counters, snapshot via `BatchingPublisher::stats`
#[derive(Debug, Clone, Default)]
pub struct PublisherStats {
    /// Events accepted into the pending batch
    pub events_enqueued: u64,

    /// Events confirmed written to the broker
    pub events_published: u64,

    /// Events dropped or failed permanently
    pub events_failed: u64,

    /// Broker writes performed
    pub batches_sent: u64,

    /// Publishes that fell back to the synchronous path
    pub sync_fallbacks: u64,

    /// When the last broker write succeeded
    pub last_publish_at: Option<DateTime<Utc>>,
}
