use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use url::Url;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "CONSUMER_GROUP")]
    pub consumer_group: NonEmptyString,

    #[envconfig(from = "CONSUMER_TOPIC")]
    pub consumer_topic: NonEmptyString,

    #[envconfig(from = "KAFKA_LAG_TOLERANCE", default = "500")]
    pub lag_tolerance: i64,

    /// Forwarding is disabled when unset or empty.
    #[envconfig(from = "PRODUCER_TOPIC")]
    pub producer_topic: Option<String>,

    /// Base address of the service persisting native content.
    #[envconfig(from = "NATIVE_RW_ADDRESS")]
    pub native_rw_address: Url,

    #[envconfig(from = "NATIVE_CONTENT_UUID_FIELDS", default = "uuid")]
    pub content_uuid_fields: FieldPaths,

    /// Kind of content handled by this instance, e.g. "Content" or "Annotations".
    /// Only used to label logs and metrics.
    #[envconfig(from = "CONTENT_TYPE", default = "Content")]
    pub content_type: String,

    #[envconfig(from = "APP_NAME", default = "native-ingester")]
    pub app_name: String,

    /// Path to the routing configuration document.
    #[envconfig(from = "CONFIG", default = "config.json")]
    pub routing_config: String,

    #[envconfig(from = "PANIC_GUIDE_URL")]
    pub panic_guide_url: NonEmptyString,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "5000")]
    pub request_timeout: EnvMsDuration,

    /// Applied to each health check on its own.
    #[envconfig(from = "HEALTH_TIMEOUT_MS", default = "10000")]
    pub health_timeout: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn forward_topic(&self) -> Option<&str> {
        self.producer_topic
            .as_deref()
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // We default to "earliest" so that a new consumer group ingests the backlog.
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "0")]
    pub kafka_producer_linger_ms: u32, // Forwarded messages are sent one by one, don't wait for a batch

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// Comma separated list of dot-separated JSON paths, e.g. `uuid,post.uuid,data.uuidv3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPaths(pub Vec<String>);

#[derive(Debug, PartialEq, Eq)]
pub struct NoFieldPathError;

impl FromStr for FieldPaths {
    type Err = NoFieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let paths: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(str::to_owned)
            .collect();

        if paths.is_empty() {
            Err(NoFieldPathError)
        } else {
            Ok(FieldPaths(paths))
        }
    }
}
