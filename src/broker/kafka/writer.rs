//! Kafka write half — batched produce over `FutureProducer`

use super::config::KafkaConfig;
use crate::broker::{BrokerWriter, ProducerRecord};
use crate::error::{EventError, Result};
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;

/// Kafka producer wrapper
///
/// One `write` call sends every record in the batch and awaits all
/// delivery acknowledgements before returning.
pub struct KafkaWriter {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaWriter {
    /// Create the producer and verify the configuration
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.broker_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("request.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", config.acks.as_str())
            .set("compression.type", config.compression.as_str())
            .set("linger.ms", config.linger_ms.to_string())
            .create()
            .map_err(|e| {
                EventError::Connection(format!("{}: {}", config.broker_string(), e))
            })?;

        tracing::info!(
            brokers = %config.broker_string(),
            topic = %config.topic,
            compression = config.compression.as_str(),
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }
}

#[async_trait]
impl BrokerWriter for KafkaWriter {
    async fn write(&self, records: Vec<ProducerRecord>) -> Result<()> {
        let deliveries = records.iter().map(|record| {
            let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
            for (name, value) in &record.headers {
                headers = headers.insert(Header {
                    key: name.as_str(),
                    value: Some(value.as_bytes()),
                });
            }

            self.producer.send(
                FutureRecord::to(&self.topic)
                    .key(&record.key)
                    .payload(record.payload.as_ref())
                    .headers(headers)
                    .timestamp(record.timestamp.timestamp_millis()),
                Timeout::After(self.send_timeout),
            )
        });

        for delivery in futures::future::join_all(deliveries).await {
            delivery.map_err(|(err, _)| EventError::Publish {
                topic: self.topic.clone(),
                reason: err.to_string(),
            })?;
        }

        tracing::debug!(topic = %self.topic, batch_size = records.len(), "Batch written to Kafka");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // flush blocks until outstanding deliveries drain, so it runs off
        // the async executor
        let producer = self.producer.clone();
        let timeout = self.send_timeout;
        let topic = self.topic.clone();

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| EventError::Publish {
                topic: topic.clone(),
                reason: format!("flush task failed: {}", e),
            })?
            .map_err(|e| EventError::Publish {
                topic,
                reason: format!("flush failed: {}", e),
            })?;

        tracing::info!(topic = %self.topic, "Kafka producer closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "kafka"
    }
}
