use std::time::Duration;

use async_trait::async_trait;
use native_common::message::InboundEvent;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::PublishError;
use crate::kafka::{client_config, KafkaContext};

/// Republishes consumed events to a downstream topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish the event body with its header map. Headers are whatever the
    /// consumer kept, so the forwarded record is not a byte-for-byte copy of the
    /// consumed one.
    async fn send(&self, event: InboundEvent) -> Result<(), PublishError>;

    async fn check_live(&self) -> Result<(), PublishError>;
}

pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<Self, KafkaError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = client_config(config);
        client_config
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec);

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext::producer())?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        drop(producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?);
        info!("connected to Kafka brokers");

        Ok(Self {
            producer,
            topic: topic.to_owned(),
            queue_timeout: Duration::from_millis(config.kafka_message_timeout_ms.into()),
        })
    }
}

/// Kafka headers carrying every header of the event map.
///
/// The map is built on consumption: headers without a value are already gone,
/// repeated keys have collapsed to the last value, and non UTF-8 values were
/// replaced lossily. Header order is not kept either.
fn owned_headers(event: &InboundEvent) -> OwnedHeaders {
    event
        .headers
        .iter()
        .fold(
            OwnedHeaders::new_with_capacity(event.headers.len()),
            |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            },
        )
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn send(&self, event: InboundEvent) -> Result<(), PublishError> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic)
            .payload(event.body.as_ref())
            .headers(owned_headers(&event));

        match self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok(_) => Ok(()),
            Err((error, _)) => Err(PublishError::ProduceError(error)),
        }
    }

    async fn check_live(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();

        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(Duration::new(5, 0)))
                .map(|_| ())
                .map_err(PublishError::ConnectivityError)
        })
        .await?
    }
}
