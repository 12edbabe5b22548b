//! Publishes entities to the log as JSON events.

use crate::config::{KafkaConfig, PublisherConfig};
use crate::error::{Error, KafkaError};
use crate::kafka::apply_security;
use crate::model::{encode_payload, Entity};
use crate::Result;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Broker acknowledgement of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub partition: i32,
    pub offset: i64,
}

/// Kafka producer writing entities to the configured topic.
///
/// Messages are keyed by entity id, so every event for one entity lands in
/// the same partition and is consumed in publish order.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    /// Create a producer for `kafka.topic`.
    pub fn new(kafka: &KafkaConfig, publisher: &PublisherConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", kafka.bootstrap_servers.join(","))
            .set("message.timeout.ms", publisher.message_timeout_ms.to_string())
            .set("acks", &publisher.acks);

        apply_security(&mut client_config, kafka);

        let producer: FutureProducer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: kafka.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        info!(
            topic = %kafka.topic,
            servers = %kafka.bootstrap_servers.join(","),
            acks = %publisher.acks,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            topic: kafka.topic.clone(),
            delivery_timeout: Duration::from_millis(publisher.message_timeout_ms),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one entity and wait for the broker acknowledgement.
    pub async fn publish<E: Entity>(&self, entity: &E) -> Result<PublishAck> {
        let key = entity.id().to_string();
        let payload = encode_payload(entity)?;

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
        let (partition, offset) = self
            .producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(e, _)| {
                Error::Kafka(KafkaError::Delivery {
                    topic: self.topic.clone(),
                    message: e.to_string(),
                })
            })?;

        debug!(
            topic = %self.topic,
            key = %key,
            partition,
            offset,
            "Entity published"
        );

        Ok(PublishAck { partition, offset })
    }

    /// Publish entities in order, stopping at the first failure.
    pub async fn publish_all<E: Entity>(&self, entities: &[E]) -> Result<Vec<PublishAck>> {
        let mut acks = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.publish(entity).await {
                Ok(ack) => acks.push(ack),
                Err(e) => {
                    warn!(
                        id = %entity.id(),
                        published = acks.len(),
                        error = %e,
                        "Publish failed, stopping"
                    );
                    return Err(e);
                }
            }
        }
        info!(topic = %self.topic, count = acks.len(), "Entities published");
        Ok(acks)
    }

    /// Wait for outstanding deliveries.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout).map_err(|e| {
            Error::Kafka(KafkaError::Delivery {
                topic: self.topic.clone(),
                message: e.to_string(),
            })
        })
    }
}
