use metrics::gauge;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaResult;
use rdkafka::{ClientConfig, TopicPartitionList};
use tracing::warn;

use crate::config::KafkaConfig;

/// Client context shared by the consumer and the producer, exporting librdkafka
/// statistics as gauges labeled with the client role.
pub struct KafkaContext {
    role: &'static str,
}

impl KafkaContext {
    pub fn consumer() -> Self {
        Self { role: "consumer" }
    }

    pub fn producer() -> Self {
        Self { role: "producer" }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("native_ingester_kafka_callback_queue_depth", "role" => self.role)
            .set(stats.replyq as f64);
        gauge!("native_ingester_kafka_queue_depth", "role" => self.role)
            .set(stats.msg_cnt as f64);

        for (topic, topic_stats) in stats.topics {
            for (partition, partition_stats) in topic_stats.partitions {
                // librdkafka reports -1 for partitions this client does not consume
                if partition_stats.consumer_lag < 0 {
                    continue;
                }
                gauge!(
                    "native_ingester_kafka_consumer_lag",
                    "topic" => topic.clone(),
                    "partition" => partition.to_string()
                )
                .set(partition_stats.consumer_lag as f64);
            }
        }

        for (_, broker) in stats.brokers {
            gauge!(
                "native_ingester_kafka_broker_requests_pending",
                "role" => self.role,
                "broker" => broker.nodeid.to_string()
            )
            .set(broker.outbuf_cnt as f64);
        }
    }
}

impl ConsumerContext for KafkaContext {
    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(error) = result {
            warn!("failed to commit consumer offsets: {}", error);
        }
    }
}

/// Settings common to every Kafka client of the ingester.
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000");

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}
