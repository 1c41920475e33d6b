//! Kafka integration tests
//!
//! These tests require a Kafka broker at 127.0.0.1:9092 with topic
//! auto-creation enabled. They are skipped automatically if the broker
//! is not reachable.

use event_relay::broker::encode_event;
use event_relay::broker::kafka::StartOffset;
use event_relay::{
    BatchingPublisher, BrokerConsumer, BrokerWriter, ConsumerConfig, ConsumerPipeline, Event,
    EventType,
    FnHandler, HandlerRegistry, KafkaConfig, KafkaReader, KafkaWriter, NoopMetrics, PublisherConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Probe the broker with a short-timeout write. Returns None (skip) if
/// Kafka is unavailable.
async fn try_kafka(suffix: &str) -> Option<KafkaConfig> {
    let config = KafkaConfig {
        brokers: vec!["127.0.0.1:9092".to_string()],
        topic: format!("event-relay-test-{}", suffix),
        group_id: format!("event-relay-test-{}", suffix),
        start_offset: StartOffset::Earliest,
        message_timeout_ms: 3_000,
        ..Default::default()
    };

    let writer = match KafkaWriter::connect(&config) {
        Ok(writer) => writer,
        Err(_) => return None,
    };
    let probe = encode_event(&Event::new(EventType::UserCreated, "probe")).unwrap();
    match writer.write(vec![probe]).await {
        Ok(()) => Some(config),
        Err(_) => {
            eprintln!("Kafka not available, skipping integration test");
            None
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kafka_publish_and_read_back() {
    let Some(config) = try_kafka("pub_read").await else {
        return;
    };

    let writer = Arc::new(KafkaWriter::connect(&config).unwrap());
    let publisher = BatchingPublisher::start(
        writer,
        PublisherConfig {
            batch_size: 3,
            batch_timeout: Duration::from_millis(100),
            ..Default::default()
        },
        Arc::new(NoopMetrics),
    )
    .unwrap();

    let events: Vec<Event> = (0..3)
        .map(|i| Event::new(EventType::OrderPlaced, format!("kafka-roundtrip-{}", i)))
        .collect();
    for event in &events {
        publisher.publish(event.clone()).await.unwrap();
    }
    publisher.close().await.unwrap();

    // Read everything back and look for our payloads
    let reader = KafkaReader::connect(&config).unwrap();
    let mut found = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(15);
    while found.len() < events.len() && Instant::now() < deadline {
        if let Some(record) = reader.poll(Duration::from_secs(1)).await.unwrap() {
            if let Ok(event) = event_relay::broker::decode_event(&record) {
                if event.data.starts_with("kafka-roundtrip-") {
                    found.push(event);
                }
            }
        }
    }
    reader.close().await.unwrap();

    assert_eq!(found.len(), events.len());
    let expected: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    for event in &found {
        assert!(expected.contains(&event.id.as_str()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kafka_pipeline_end_to_end() {
    let Some(config) = try_kafka("pipeline").await else {
        return;
    };

    let writer = Arc::new(KafkaWriter::connect(&config).unwrap());
    let publisher = BatchingPublisher::start(
        writer,
        PublisherConfig {
            batch_size: 5,
            batch_timeout: Duration::from_millis(100),
            ..Default::default()
        },
        Arc::new(NoopMetrics),
    )
    .unwrap();

    for i in 0..5 {
        publisher
            .publish(Event::new(EventType::UserCreated, format!("kafka-e2e-{}", i)))
            .await
            .unwrap();
    }
    publisher.close().await.unwrap();

    let handled = Arc::new(AtomicUsize::new(0));
    let counted = handled.clone();
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(FnHandler::new(
        EventType::UserCreated,
        move |event: Event| {
            let counted = counted.clone();
            async move {
                if event.data.starts_with("kafka-e2e-") {
                    counted.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        },
    )));

    let reader = KafkaReader::connect(&config).unwrap();
    let pipeline = ConsumerPipeline::new(
        Arc::new(reader),
        handlers,
        ConsumerConfig {
            worker_count: 2,
            poll_timeout: Duration::from_millis(500),
            commit_interval: Duration::from_millis(200),
            ..Default::default()
        },
        Arc::new(NoopMetrics),
    )
    .unwrap();
    pipeline.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while handled.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    pipeline.close().await.unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 5);
    assert!(pipeline.stats().messages_consumed >= 5);
}
