//! Kafka-backed job queue
//!
//! The producer publishes with idempotence and full acks so a job message is
//! broker-accepted before the upload response returns. The consumer runs with
//! auto-commit disabled: acking a delivery commits the offset past it, and a
//! nack seeks back so the message is polled again. Offsets never committed
//! are redelivered on reconnect, which is the at-least-once contract the
//! worker relies on.

use super::{JobDelivery, JobPublisher, JobSource, Receipt};
use crate::config::QueueConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info};

/// Producer handle bound to one topic
#[derive(Clone)]
pub struct KafkaJobPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaJobPublisher {
    pub fn new(brokers: &str, topic: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| AppError::Queue(format!("failed to create producer for {topic}: {e}")))?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl JobPublisher for KafkaJobPublisher {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        let record: FutureRecord<'_, (), [u8]> =
            FutureRecord::to(&self.topic).payload(payload.as_ref());

        self.producer
            .send(record, Duration::from_secs(10))
            .await
            .map_err(|(e, _)| AppError::Queue(format!("publish to {} failed: {e}", self.topic)))?;

        debug!(topic = %self.topic, bytes = payload.len(), "job published");
        Ok(())
    }
}

/// Manual-commit consumer over the job topic
pub struct KafkaJobSource {
    consumer: StreamConsumer,
}

impl KafkaJobSource {
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| AppError::Queue(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| AppError::Queue(format!("failed to subscribe to {}: {e}", config.topic)))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "job consumer initialized"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl JobSource for KafkaJobSource {
    async fn next(&mut self) -> Result<Option<JobDelivery>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| AppError::Queue(format!("consumer receive failed: {e}")))?;

        let payload = message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();

        Ok(Some(JobDelivery {
            payload,
            receipt: Receipt::Kafka {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            },
        }))
    }

    async fn ack(&mut self, delivery: &JobDelivery) -> Result<()> {
        let Receipt::Kafka {
            ref topic,
            partition,
            offset,
        } = delivery.receipt
        else {
            return Err(AppError::Queue("foreign delivery receipt".to_string()));
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| AppError::Queue(format!("offset bookkeeping failed: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| AppError::Queue(format!("offset commit failed: {e}")))
    }

    async fn nack(&mut self, delivery: &JobDelivery) -> Result<()> {
        let Receipt::Kafka {
            ref topic,
            partition,
            offset,
        } = delivery.receipt
        else {
            return Err(AppError::Queue("foreign delivery receipt".to_string()));
        };

        // Rewind so the uncommitted message is polled again
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
            .map_err(|e| AppError::Queue(format!("seek for redelivery failed: {e}")))
    }
}
