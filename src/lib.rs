//! # event-relay
//!
//! Batched, retrying event delivery over a partitioned broker.
//!
//! ## Overview
//!
//! `event-relay` moves domain events from producers to consumers through a
//! Kafka-compatible broker, trading per-message latency for throughput and
//! delivery reliability. It provides the two halves of the delivery
//! pipeline:
//!
//! - **`BatchingPublisher`** — accepts one event at a time, groups events
//!   into batches, and flushes on size or timer; broker writes retry with
//!   backoff, and a full internal queue degrades to a synchronous send
//!   instead of dropping events.
//! - **`ConsumerPipeline`** — a reader feeding a bounded channel (the
//!   backpressure point), a fixed worker pool dispatching each record to a
//!   per-type handler with retry, and a batch committer that acknowledges
//!   offsets up to the per-partition watermark.
//!
//! ## Quick start
//!
//! ```rust
//! use event_relay::broker::memory::MemoryBroker;
//! use event_relay::{BatchingPublisher, Event, EventType, NoopMetrics, PublisherConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> event_relay::Result<()> {
//! let broker = MemoryBroker::new();
//! let publisher = BatchingPublisher::start(
//!     Arc::new(broker.writer()),
//!     PublisherConfig::default(),
//!     Arc::new(NoopMetrics),
//! )?;
//!
//! publisher
//!     .publish(Event::new(EventType::UserCreated, "alice@example.com"))
//!     .await?;
//!
//! publisher.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **memory** — in-process broker for tests and single-process use
//! - **kafka** — production transport over librdkafka
//!
//! ## Architecture
//!
//! - **`BrokerWriter` / `BrokerConsumer`** traits — the transport seam all
//!   backends implement
//! - **`HandlerRegistry`** — per-type handler dispatch on the consume side
//! - **`PublisherMetrics` / `ConsumerMetrics`** — injected metrics seams;
//!   no global registry
//! - **`Event`** — validated envelope with a fixed flat wire format

pub mod broker;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
mod retry;
pub mod types;
pub mod watermark;

// Re-export core types
pub use error::{EventError, Result, ValidationError};
pub use handler::{EventHandler, FnHandler, HandlerRegistry};
pub use metrics::{ConsumerMetrics, MemoryMetrics, NoopMetrics, PublisherMetrics};
pub use pipeline::{ConsumerConfig, ConsumerPipeline, PipelineState};
pub use publisher::{BatchingPublisher, PublisherConfig};
pub use types::{
    ConsumerStats, Event, EventType, ProcessingResult, ProcessorStats, PublisherStats,
    MAX_DATA_BYTES,
};

// Re-export the transport seam and backends for convenience
pub use broker::kafka::{KafkaConfig, KafkaReader, KafkaWriter};
pub use broker::memory::{MemoryBroker, MemoryConsumer, MemoryWriter};
pub use broker::{BrokerConsumer, BrokerWriter, ConsumerRecord, OffsetMark, ProducerRecord};
