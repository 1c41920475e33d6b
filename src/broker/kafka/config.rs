//! Kafka backend configuration
//!
//! Plain struct consumed by the reader and writer; loading values from the
//! environment or files is the embedding service's concern. `validate`
//! performs the range checks the pipeline relies on.

use crate::error::{EventError, Result};

/// Payload compression applied by the producer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    /// librdkafka `compression.type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

/// Producer acknowledgement level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequiredAcks {
    /// Fire and forget
    None,
    /// Leader acknowledgement only
    Leader,
    /// All in-sync replicas
    #[default]
    All,
}

impl RequiredAcks {
    /// librdkafka `acks` value
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredAcks::None => "0",
            RequiredAcks::Leader => "1",
            RequiredAcks::All => "all",
        }
    }
}

/// Where a consumer group without committed offsets starts reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartOffset {
    Earliest,
    #[default]
    Latest,
}

impl StartOffset {
    /// librdkafka `auto.offset.reset` value
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

/// Kafka connection and tuning configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap broker addresses
    pub brokers: Vec<String>,

    /// Topic events are written to and read from
    pub topic: String,

    /// Consumer group id
    pub group_id: String,

    /// Producer compression
    pub compression: Compression,

    /// Producer acknowledgement level
    pub acks: RequiredAcks,

    /// Producer linger before a broker request (milliseconds)
    pub linger_ms: u64,

    /// Producer delivery timeout (milliseconds)
    pub message_timeout_ms: u64,

    /// Consumer start position when the group has no committed offsets
    pub start_offset: StartOffset,

    /// Consumer group session timeout (milliseconds)
    pub session_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "events".to_string(),
            group_id: "event-relay".to_string(),
            compression: Compression::None,
            acks: RequiredAcks::All,
            linger_ms: 10,
            message_timeout_ms: 30_000,
            start_offset: StartOffset::Latest,
            session_timeout_ms: 10_000,
        }
    }
}

impl KafkaConfig {
    /// Check the ranges the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() || self.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(EventError::Config(
                "kafka brokers not configured".to_string(),
            ));
        }
        if self.topic.is_empty() {
            return Err(EventError::Config("kafka topic not configured".to_string()));
        }
        if self.group_id.is_empty() {
            return Err(EventError::Config(
                "kafka consumer group id not configured".to_string(),
            ));
        }
        if self.message_timeout_ms == 0 {
            return Err(EventError::Config(
                "kafka message timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Comma-separated broker list for `bootstrap.servers`
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KafkaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker_string(), "localhost:9092");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let config = KafkaConfig {
            brokers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KafkaConfig {
            brokers: vec!["  ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KafkaConfig {
            topic: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KafkaConfig {
            group_id: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broker_string_joins_addresses() {
        let config = KafkaConfig {
            brokers: vec!["a:9092".to_string(), "b:9092".to_string()],
            ..Default::default()
        };
        assert_eq!(config.broker_string(), "a:9092,b:9092");
    }

    #[test]
    fn test_client_config_values() {
        assert_eq!(Compression::Lz4.as_str(), "lz4");
        assert_eq!(RequiredAcks::All.as_str(), "all");
        assert_eq!(RequiredAcks::Leader.as_str(), "1");
        assert_eq!(StartOffset::Earliest.as_str(), "earliest");
    }
}
