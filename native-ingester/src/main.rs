//! Consume native publication events from Kafka, store them in the native store
//! and optionally forward them to another topic.
use std::sync::Arc;

use envconfig::Envconfig;
use futures::future::{select, Either};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use native_common::content::IdentifierExtractor;
use native_common::metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use native_common::routing::RoutingTable;
use native_ingester::checks::{self, Collaborators};
use native_ingester::config::Config;
use native_ingester::consumer::{Consumer, KafkaConsumer};
use native_ingester::error::IngesterError;
use native_ingester::handler::MessageHandler;
use native_ingester::producer::{KafkaPublisher, Publisher};
use native_ingester::writer::NativeWriter;

#[tokio::main]
async fn main() -> Result<(), IngesterError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env()?;

    let routing = RoutingTable::from_path(&config.routing_config)?;
    info!(
        path = config.routing_config.as_str(),
        origins = routing.len(),
        "loaded routing configuration"
    );
    if routing.is_empty() {
        warn!("routing configuration has no origins, every message will be skipped");
    }

    let writer = Arc::new(NativeWriter::new(
        config.native_rw_address.clone(),
        Arc::new(routing),
        IdentifierExtractor::new(config.content_uuid_fields.0.iter()),
        config.request_timeout.0,
    )?);

    let mut handler = MessageHandler::new(writer.clone(), &config.content_type);
    let publisher: Option<Arc<dyn Publisher>> = match config.forward_topic() {
        Some(topic) => {
            info!(topic, "forwarding ingested messages");
            let publisher: Arc<dyn Publisher> =
                Arc::new(KafkaPublisher::new(&config.kafka, topic)?);
            handler = handler.forward_to(publisher.clone());
            Some(publisher)
        }
        None => None,
    };

    let consumer = Arc::new(KafkaConsumer::new(
        &config.kafka,
        config.consumer_group.as_str(),
        config.consumer_topic.as_str(),
        config.lag_tolerance,
    )?);

    let collaborators = Collaborators {
        consumer: consumer.clone(),
        writer,
        publisher,
    };
    let router = checks::app(
        checks::health_check(
            &config.app_name,
            config.panic_guide_url.as_str(),
            config.health_timeout.0,
            &collaborators,
        ),
        checks::good_to_go(&config.app_name, config.health_timeout.0, &collaborators),
    );
    let router = setup_metrics_routes(router, setup_metrics_recorder()?);

    let bind = config.bind();
    info!(bind = bind.as_str(), "serving health endpoints");
    let http_server = Box::pin(async move { serve(router, &bind).await });
    let consume_loop = Box::pin(async move { consumer.start(Arc::new(handler)).await });

    match select(http_server, consume_loop).await {
        Either::Left((result, _)) => {
            error!("health endpoints server exited");
            result?;
        }
        Either::Right((result, _)) => {
            error!("consumer exited");
            result?;
        }
    }

    Ok(())
}
