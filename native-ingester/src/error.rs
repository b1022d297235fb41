use http::StatusCode;
use native_common::content::ExtractError;
use native_common::routing::RoutingConfigError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Enumeration of errors related to writing a message to the native store.
/// None of them are retried: the message is dropped.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    IdentifierNotFound(#[from] ExtractError),
    #[error("failed to serialize content body: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("error parsing native writer headers")]
    ParseHeadersError(http::Error),
    #[error("error building native writer url: {0}")]
    ParseUrlError(url::ParseError),
    #[error("error calling native writer: {0}")]
    StorageWriteFailed(reqwest::Error),
    #[error("native writer returned non-2xx status code {0}")]
    StorageWriteRejected(StatusCode),
}

/// Why the native store is not good to go, carrying the underlying cause.
#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("error in building request to check if the native writer is good to go: {0}")]
    InvalidUrl(url::ParseError),
    #[error("native writer is not good to go: {0}")]
    Unreachable(reqwest::Error),
    #[error("native writer is not good to go: GTG HTTP status code is {0}")]
    NotGoodToGo(StatusCode),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to produce to kafka: {0}")]
    ProduceError(KafkaError),
    #[error("producer is not connected to kafka: {0}")]
    ConnectivityError(KafkaError),
    #[error("producer check was interrupted: {0}")]
    CheckInterrupted(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("kafka consumer error: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("consumer is lagging behind on {topic}[{partition}]: lag {lag} exceeds tolerance {tolerance}")]
    LagExceeded {
        topic: String,
        partition: i32,
        lag: i64,
        tolerance: i64,
    },
    #[error("consumer check was interrupted: {0}")]
    CheckInterrupted(#[from] tokio::task::JoinError),
}

/// Enumeration of errors that prevent the ingester from starting or running.
#[derive(Error, Debug)]
pub enum IngesterError {
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("invalid routing configuration: {0}")]
    RoutingError(#[from] RoutingConfigError),
    #[error("failed to build native writer http client: {0}")]
    HttpClientError(#[from] reqwest::Error),
    #[error("failed to connect to kafka: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("consumer stopped: {0}")]
    ConsumerError(#[from] ConsumerError),
    #[error("failed to install metrics recorder: {0}")]
    MetricsError(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to serve health endpoints: {0}")]
    ServeError(#[from] std::io::Error),
}
