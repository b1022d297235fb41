use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Serve the admin endpoints (health, good-to-go, metrics) until the listener fails.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

/// Mount `/metrics` and time every admin request, `/metrics` included.
pub fn setup_metrics_routes(router: Router, recorder_handle: PrometheusHandle) -> Router {
    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

/// Install the global Prometheus recorder. Must only be called once per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Count and time admin requests by method, route and status.
/// Unrouted requests are labelled with their raw path.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("native_ingester_http_requests_total", &labels).increment(1);
    metrics::histogram!("native_ingester_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

/// Count a consumed message by how its handling ended.
pub fn report_message_outcome(outcome: &'static str) {
    metrics::counter!("native_ingester_messages_total", "outcome" => outcome).increment(1);
}

pub fn report_write_duration(collection: &str, method: &'static str, seconds: f64) {
    metrics::histogram!(
        "native_ingester_write_duration_seconds",
        "collection" => collection.to_owned(),
        "method" => method
    )
    .record(seconds);
}

pub fn report_forward(result: &'static str) {
    metrics::counter!("native_ingester_forwards_total", "result" => result).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn router() -> Router {
        Router::new()
            .route("/__ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn(track_metrics))
    }

    #[tokio::test]
    async fn tracked_requests_pass_through() {
        let ok = router()
            .oneshot(Request::get("/__ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = router()
            .oneshot(Request::get("/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
