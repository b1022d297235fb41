use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use native_common::message::InboundEvent;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Headers;
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset};
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::ConsumerError;
use crate::handler::MessageHandler;
use crate::kafka::{client_config, KafkaContext};

/// Feeds consumed events to the message handler, and reports on its own liveness.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Consume until the process stops, handing every message to the handler.
    async fn start(&self, handler: Arc<MessageHandler>) -> Result<(), ConsumerError>;

    async fn check_live(&self) -> Result<(), ConsumerError>;

    /// Fail when any assigned partition lags behind by more than the tolerance.
    async fn check_lag(&self) -> Result<(), ConsumerError>;
}

pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer<KafkaContext>>,
    topic: String,
    lag_tolerance: i64,
}

impl KafkaConsumer {
    pub fn new(
        config: &KafkaConfig,
        group: &str,
        topic: &str,
        lag_tolerance: i64,
    ) -> Result<Self, KafkaError> {
        let mut client_config = client_config(config);
        client_config
            .set("group.id", group)
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            .set("enable.auto.offset.store", "false");

        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(KafkaContext::consumer())?;
        consumer.subscribe(&[topic])?;
        info!(topic, group, "subscribed to Kafka topic");

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: topic.to_owned(),
            lag_tolerance,
        })
    }
}

/// Convert a consumed Kafka message to an event. Headers without a value are skipped,
/// and non UTF-8 values are converted lossily.
pub fn event_from_message<M: Message>(message: &M) -> InboundEvent {
    let headers: HashMap<String, String> = message
        .headers()
        .map(|headers| {
            (0..headers.count())
                .filter_map(|idx| headers.try_get(idx))
                .filter_map(|header| {
                    header.value.map(|value| {
                        (
                            header.key.to_owned(),
                            String::from_utf8_lossy(value).into_owned(),
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let body = message
        .payload()
        .map(Bytes::copy_from_slice)
        .unwrap_or_default();

    InboundEvent::new(headers, body)
}

fn check_partition_lag(
    topic: &str,
    partition: i32,
    position: i64,
    high_watermark: i64,
    tolerance: i64,
) -> Result<(), ConsumerError> {
    let lag = high_watermark - position;
    if lag > tolerance {
        return Err(ConsumerError::LagExceeded {
            topic: topic.to_owned(),
            partition,
            lag,
            tolerance,
        });
    }
    Ok(())
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn start(&self, handler: Arc<MessageHandler>) -> Result<(), ConsumerError> {
        info!(topic = self.topic.as_str(), "starting to consume");

        loop {
            let (event, partition, offset) = match self.consumer.recv().await {
                Ok(message) => (
                    event_from_message(&message),
                    message.partition(),
                    message.offset(),
                ),
                Err(error) => {
                    error!("failed to receive message from Kafka: {}", error);
                    continue;
                }
            };

            handler.handle(event).await;

            // Handled messages are never redelivered, whatever the outcome.
            // The stored offset is the next one to consume.
            if let Err(error) = self
                .consumer
                .store_offset(&self.topic, partition, offset + 1)
            {
                error!(
                    partition,
                    offset, "failed to store consumer offset: {}", error
                );
            }
        }
    }

    async fn check_live(&self) -> Result<(), ConsumerError> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();

        tokio::task::spawn_blocking(move || {
            consumer
                .client()
                .fetch_metadata(Some(topic.as_str()), Timeout::After(Duration::new(5, 0)))
                .map(|_| ())
                .map_err(ConsumerError::KafkaError)
        })
        .await?
    }

    async fn check_lag(&self) -> Result<(), ConsumerError> {
        let consumer = self.consumer.clone();
        let tolerance = self.lag_tolerance;

        tokio::task::spawn_blocking(move || -> Result<(), ConsumerError> {
            let positions = consumer.position()?;
            for elem in positions.elements() {
                // Partitions without a position yet have nothing to compare against
                let Offset::Offset(position) = elem.offset() else {
                    continue;
                };
                let (_, high) = consumer.fetch_watermarks(
                    elem.topic(),
                    elem.partition(),
                    Timeout::After(Duration::new(5, 0)),
                )?;
                check_partition_lag(elem.topic(), elem.partition(), position, high, tolerance)?;
            }
            Ok(())
        })
        .await?
    }
}
