use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Output of a single checker run.
pub type CheckOutcome = Result<String, String>;

type Checker = Arc<dyn Fn() -> BoxFuture<'static, CheckOutcome> + Send + Sync>;

/// Static description of a check, displayed alongside its outcome.
#[derive(Debug, Clone, Default)]
pub struct CheckInfo {
    pub id: String,
    pub name: String,
    /// 1 is the most severe, 3 the least.
    pub severity: u8,
    pub business_impact: String,
    pub technical_summary: String,
    pub panic_guide: String,
}

#[derive(Clone)]
struct Check {
    info: CheckInfo,
    checker: Checker,
}

/// Health reporting for the collaborators of the service.
///
/// The ingester can only be trusted with content if every collaborator
/// it depends on is reachable: the Kafka consumer, the storage service,
/// and the Kafka producer when forwarding is enabled.
///
/// Each collaborator is registered on a HealthCheck with a static
/// description and an async checker. Checkers return the human readable
/// output on success, or the failure message. A set of checks can be
/// served two ways:
///   - a detailed report running every check, for operators (`/__health`)
///   - a fail-fast good-to-go status, for load balancers (`/__gtg`)
///
/// Every checker runs under the configured timeout, so a hanging
/// collaborator is reported as failed instead of stalling the endpoint.
#[derive(Clone)]
pub struct HealthCheck {
    system_code: String,
    name: String,
    description: String,
    timeout: Duration,
    checks: Vec<Check>,
}

/// Outcome of one check, as serialized in the detailed report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub id: String,
    pub name: String,
    pub ok: bool,
    pub severity: u8,
    pub business_impact: String,
    pub technical_summary: String,
    pub panic_guide: String,
    pub check_output: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub system_code: String,
    pub name: String,
    pub description: String,
    /// The overall status: true if all checks passed
    pub ok: bool,
    pub checks: Vec<CheckResult>,
}

impl IntoResponse for HealthReport {
    /// The detailed report is informational: it is always served with a 200,
    /// the overall status lives in the `ok` field.
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoodToGo {
    Ok,
    NotOk(String),
}

impl IntoResponse for GoodToGo {
    fn into_response(self) -> Response {
        match self {
            GoodToGo::Ok => (StatusCode::OK, "OK".to_owned()),
            GoodToGo::NotOk(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        }
        .into_response()
    }
}

impl HealthCheck {
    pub fn new(system_code: &str, name: &str, description: &str, timeout: Duration) -> Self {
        Self {
            system_code: system_code.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            timeout,
            checks: Vec::new(),
        }
    }

    /// Registers a new check. Checks are reported in registration order.
    pub fn register<F, Fut>(mut self, info: CheckInfo, checker: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckOutcome> + Send + 'static,
    {
        let checker: Checker = Arc::new(move || Box::pin(checker()));
        self.checks.push(Check { info, checker });
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    async fn run_check(&self, check: &Check) -> CheckOutcome {
        match tokio::time::timeout(self.timeout, (check.checker)()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(format!(
                "check timed out after {}ms",
                self.timeout.as_millis()
            )),
        }
    }

    /// Runs every check concurrently and collects all the outcomes.
    pub async fn report(&self) -> HealthReport {
        let outcomes = future::join_all(self.checks.iter().map(|check| self.run_check(check))).await;
        let last_updated = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        let checks: Vec<CheckResult> = self
            .checks
            .iter()
            .zip(outcomes)
            .map(|(check, outcome)| {
                let (ok, check_output) = match outcome {
                    Ok(output) => (true, output),
                    Err(message) => (false, message),
                };
                CheckResult {
                    id: check.info.id.clone(),
                    name: check.info.name.clone(),
                    ok,
                    severity: check.info.severity,
                    business_impact: check.info.business_impact.clone(),
                    technical_summary: check.info.technical_summary.clone(),
                    panic_guide: check.info.panic_guide.clone(),
                    check_output,
                    last_updated: last_updated.clone(),
                }
            })
            .collect();

        let ok = checks.iter().all(|check| check.ok);
        match ok {
            true => info!("{} health check ok", self.system_code),
            false => warn!(
                "{} health check failed: {:?}",
                self.system_code,
                checks
                    .iter()
                    .filter(|check| !check.ok)
                    .map(|check| check.id.as_str())
                    .collect::<Vec<_>>()
            ),
        }

        HealthReport {
            system_code: self.system_code.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            ok,
            checks,
        }
    }

    /// Runs every check concurrently and returns as soon as one fails.
    pub async fn gtg(&self) -> GoodToGo {
        let checks = self.checks.iter().map(|check| async move {
            self.run_check(check)
                .await
                .map_err(|message| format!("{}: {}", check.info.name, message))
        });

        match future::try_join_all(checks).await {
            Ok(_) => GoodToGo::Ok,
            Err(message) => {
                warn!("{} is not good to go: {}", self.system_code, message);
                GoodToGo::NotOk(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CheckInfo, GoodToGo, HealthCheck, HealthReport};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use std::time::Duration;

    fn info(id: &str) -> CheckInfo {
        CheckInfo {
            id: id.to_owned(),
            name: format!("{id} check"),
            severity: 2,
            panic_guide: "https://runbooks.example.com/native-ingester".to_owned(),
            ..Default::default()
        }
    }

    fn health() -> HealthCheck {
        HealthCheck::new(
            "native-ingester",
            "Native Ingester Healthcheck",
            "checks collaborators",
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn no_checks_is_healthy() {
        let health = health();
        assert!(health.is_empty());
        assert!(health.report().await.ok);
        assert_eq!(health.gtg().await, GoodToGo::Ok);
    }

    #[tokio::test]
    async fn report_lists_every_check_in_order() {
        let health = health()
            .register(info("one"), || async { Ok("fine".to_owned()) })
            .register(info("two"), || async { Err("broken".to_owned()) });
        assert_eq!(health.len(), 2);

        let report = health.report().await;
        assert!(!report.ok);
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.checks[0].id, "one");
        assert!(report.checks[0].ok);
        assert_eq!(report.checks[0].check_output, "fine");
        assert_eq!(report.checks[1].id, "two");
        assert!(!report.checks[1].ok);
        assert_eq!(report.checks[1].check_output, "broken");
    }

    #[tokio::test]
    async fn slow_check_times_out() {
        let health = health().register(info("slow"), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_owned())
        });

        let report = health.report().await;
        assert!(!report.ok);
        assert!(report.checks[0].check_output.contains("timed out"));

        match health.gtg().await {
            GoodToGo::NotOk(message) => assert!(message.starts_with("slow check")),
            GoodToGo::Ok => panic!("should not be good to go"),
        }
    }

    #[tokio::test]
    async fn timeout_applies_to_each_check() {
        let health = health()
            .register(info("slow"), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".to_owned())
            })
            .register(info("fast"), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("fine".to_owned())
            });

        let report = health.report().await;
        assert!(!report.checks[0].ok);
        assert_eq!(report.checks[0].check_output, "check timed out after 200ms");
        assert!(report.checks[1].ok);
        assert_eq!(report.checks[1].check_output, "fine");
    }

    #[tokio::test]
    async fn gtg_reports_failure() {
        let health = health()
            .register(info("one"), || async { Ok("fine".to_owned()) })
            .register(info("two"), || async { Err("broken".to_owned()) });

        assert_eq!(
            health.gtg().await,
            GoodToGo::NotOk("two check: broken".to_owned())
        );
    }

    #[tokio::test]
    async fn into_response() {
        let ok = GoodToGo::Ok.into_response();
        assert_eq!(ok.status(), StatusCode::OK);

        let nok = GoodToGo::NotOk("nope".to_owned()).into_response();
        assert_eq!(nok.status(), StatusCode::SERVICE_UNAVAILABLE);

        let report = HealthReport {
            system_code: "native-ingester".to_owned(),
            name: "name".to_owned(),
            description: "description".to_owned(),
            ok: false,
            checks: vec![],
        }
        .into_response();
        assert_eq!(report.status(), StatusCode::OK);

        let body = report.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["systemCode"], "native-ingester");
        assert_eq!(json["ok"], false);
    }
}
