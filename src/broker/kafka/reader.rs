//! Kafka read half — polled consume over `StreamConsumer`
//!
//! Auto-commit is disabled; the batch committer acknowledges positions
//! explicitly through `commit`.

use super::config::KafkaConfig;
use crate::broker::{BrokerConsumer, ConsumerRecord, OffsetMark};
use crate::error::{EventError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::time::Duration;

/// Kafka consumer wrapper
pub struct KafkaReader {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaReader {
    /// Create the consumer, join the group, and subscribe to the topic
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.broker_string())
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.start_offset.as_str())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .map_err(|e| {
                EventError::Connection(format!("{}: {}", config.broker_string(), e))
            })?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| EventError::Consume(format!("subscribe '{}': {}", config.topic, e)))?;

        tracing::info!(
            brokers = %config.broker_string(),
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl BrokerConsumer for KafkaReader {
    async fn poll(&self, max_wait: Duration) -> Result<Option<ConsumerRecord>> {
        // recv() is cancellation-safe, so wrapping it in a timeout drops
        // no records
        match tokio::time::timeout(max_wait, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(EventError::Consume(e.to_string())),
            Ok(Ok(message)) => Ok(Some(ConsumerRecord {
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                payload: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
                partition: message.partition(),
                offset: message.offset(),
            })),
        }
    }

    async fn commit(&self, marks: &[OffsetMark]) -> Result<()> {
        if marks.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for mark in marks {
            tpl.add_partition_offset(&self.topic, mark.partition, Offset::Offset(mark.next_offset))
                .map_err(|e| EventError::Commit(e.to_string()))?;
        }

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| EventError::Commit(e.to_string()))?;

        tracing::debug!(topic = %self.topic, partitions = marks.len(), "Offsets committed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka consumer closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "kafka"
    }
}
