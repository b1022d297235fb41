use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing, Json, Router};
use health::{CheckInfo, CheckOutcome, HealthCheck};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::consumer::Consumer;
use crate::producer::Publisher;
use crate::writer::Writer;

const NATIVE_WRITER_PANIC_GUIDE: &str = "https://runbooks.in.ft.com/nativerw";

/// The collaborators whose liveness decides the health of the ingester.
#[derive(Clone)]
pub struct Collaborators {
    pub consumer: Arc<dyn Consumer>,
    pub writer: Arc<dyn Writer>,
    pub publisher: Option<Arc<dyn Publisher>>,
}

fn log_failure<E: Display>(result: Result<(), E>, component: &str) -> CheckOutcome {
    match result {
        Ok(()) => Ok("OK".to_owned()),
        Err(e) => {
            error!("{} healthcheck failed: {}", component, e);
            Err(e.to_string())
        }
    }
}

async fn consumer_live(consumer: Arc<dyn Consumer>) -> CheckOutcome {
    log_failure(consumer.check_live().await, "Consumer connectivity")
}

async fn consumer_lag(consumer: Arc<dyn Consumer>) -> CheckOutcome {
    log_failure(consumer.check_lag().await, "Consumer status")
}

async fn producer_live(publisher: Arc<dyn Publisher>) -> CheckOutcome {
    log_failure(publisher.check_live().await, "Producer connectivity")
}

async fn writer_live(writer: Arc<dyn Writer>) -> CheckOutcome {
    writer.check_live().await.map_err(|e| e.to_string())
}

/// The full report served on `/__health`, including the consumer lag.
pub fn health_check(
    system_code: &str,
    panic_guide: &str,
    timeout: Duration,
    collaborators: &Collaborators,
) -> HealthCheck {
    let consumer = collaborators.consumer.clone();
    let writer = collaborators.writer.clone();

    let mut checks = HealthCheck::new(
        system_code,
        "Native Ingester Healthcheck",
        "It checks if kafka and native writer are available",
        timeout,
    )
    .register(
        CheckInfo {
            id: "consumer-queue".to_owned(),
            name: "ConsumerQueueReachable".to_owned(),
            severity: 2,
            business_impact: "Native content or metadata will not reach this app, nor will they be stored in native store".to_owned(),
            technical_summary: "Consumer message queue is not reachable/healthy".to_owned(),
            panic_guide: panic_guide.to_owned(),
        },
        {
            let consumer = consumer.clone();
            move || consumer_live(consumer.clone())
        },
    )
    .register(
        CheckInfo {
            id: "native-writer".to_owned(),
            name: "NativeWriterReachable".to_owned(),
            severity: 2,
            business_impact: "Content or metadata will not be written in the native store nor will they reach the end of the publishing pipeline".to_owned(),
            technical_summary: "Native writer is not reachable/healthy".to_owned(),
            panic_guide: NATIVE_WRITER_PANIC_GUIDE.to_owned(),
        },
        move || writer_live(writer.clone()),
    )
    .register(
        CheckInfo {
            id: "consumer-lag-check".to_owned(),
            name: "ConsumerMonitorCheck".to_owned(),
            severity: 3,
            business_impact: "Native content or metadata publishing is slowed down.".to_owned(),
            technical_summary: "Consumer is lagging behind the latest messages of its topic. Restarting the service might help.".to_owned(),
            panic_guide: panic_guide.to_owned(),
        },
        move || consumer_lag(consumer.clone()),
    );

    if let Some(publisher) = &collaborators.publisher {
        checks = checks.register(
            CheckInfo {
                id: "producer-queue".to_owned(),
                name: "ProducerQueueReachable".to_owned(),
                severity: 2,
                business_impact: "Content or metadata will not reach the end of the publishing pipeline".to_owned(),
                technical_summary: "Producer message queue is not reachable/healthy".to_owned(),
                panic_guide: panic_guide.to_owned(),
            },
            {
                let publisher = publisher.clone();
                move || producer_live(publisher.clone())
            },
        );
    }

    checks
}

/// The checks served on `/__gtg`: connectivity only, lag does not stop traffic.
pub fn good_to_go(
    system_code: &str,
    timeout: Duration,
    collaborators: &Collaborators,
) -> HealthCheck {
    let info = |name: &str| CheckInfo {
        id: name.to_lowercase(),
        name: name.to_owned(),
        ..Default::default()
    };

    let consumer = collaborators.consumer.clone();
    let writer = collaborators.writer.clone();

    let mut checks = HealthCheck::new(system_code, "Native Ingester GTG", "", timeout)
        .register(info("Consumer"), move || consumer_live(consumer.clone()));
    if let Some(publisher) = collaborators.publisher.clone() {
        checks = checks.register(info("Producer"), move || producer_live(publisher.clone()));
    }
    checks.register(info("Writer"), move || writer_live(writer.clone()))
}

async fn ping() -> &'static str {
    "pong"
}

async fn build_info() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn app(health: HealthCheck, gtg: HealthCheck) -> Router {
    let health = Arc::new(health);
    let gtg = Arc::new(gtg);

    Router::new()
        .route(
            "/__health",
            routing::get(move || {
                let health = health.clone();
                async move { health.report().await }
            }),
        )
        .route(
            "/__gtg",
            routing::get(move || {
                let gtg = gtg.clone();
                async move { gtg.gtg().await }
            }),
        )
        .route("/__ping", routing::get(ping))
        .route("/__build-info", routing::get(build_info))
        .layer(TraceLayer::new_for_http())
}
