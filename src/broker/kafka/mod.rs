//! Kafka broker backend
//!
//! Implements the broker seam over `rdkafka` (librdkafka bindings):
//! a `FutureProducer` for batched writes and a `StreamConsumer` with
//! auto-commit disabled for polled reads and explicit offset commits.

mod config;
mod reader;
mod writer;

pub use config::{Compression, KafkaConfig, RequiredAcks, StartOffset};
pub use reader::KafkaReader;
pub use writer::KafkaWriter;
