use std::collections::HashSet;
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use native_common::content::IdentifierExtractor;
use native_common::message::{NormalizedMessage, ORIGIN_SYSTEM_ID_HEADER};
use native_common::metrics::report_write_duration;
use native_common::routing::RoutingTable;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{info, warn};
use url::Url;

use crate::error::{LivenessError, WriteError};

/// Liveness endpoint of the native store.
pub const GTG_PATH: &str = "/__gtg";

/// Result of a successful write: the identifier the content was stored under,
/// and the content as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub identifier: String,
    pub updated_content: Bytes,
}

/// The capabilities the message handler needs from the native store.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Find the collection a content should be written to, if any.
    fn resolve(
        &self,
        origin: &str,
        content_type: &str,
        publications: &HashSet<String>,
    ) -> Option<String>;

    async fn write(
        &self,
        message: &NormalizedMessage,
        collection: &str,
    ) -> Result<WriteOutcome, WriteError>;

    async fn check_live(&self) -> Result<String, LivenessError>;
}

/// Writes native content to the native store over HTTP.
pub struct NativeWriter {
    /// Base address of the native store.
    address: Url,
    /// Rules deciding which collection a content goes to.
    routing: Arc<RoutingTable>,
    /// Finds the UUID the content is stored under.
    extractor: IdentifierExtractor,
    /// The client used for HTTP requests, shared by all messages.
    client: reqwest::Client,
}

impl NativeWriter {
    pub fn new(
        address: Url,
        routing: Arc<RoutingTable>,
        extractor: IdentifierExtractor,
        request_timeout: time::Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent("native-ingester")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            address,
            routing,
            extractor,
            client,
        })
    }

    /// Join path segments to the base address, keeping any path the base address has.
    fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}{}",
            self.address.as_str().trim_end_matches('/'),
            path
        ))
    }
}

#[async_trait]
impl Writer for NativeWriter {
    fn resolve(
        &self,
        origin: &str,
        content_type: &str,
        publications: &HashSet<String>,
    ) -> Option<String> {
        self.routing
            .resolve(origin, content_type, publications)
            .map(str::to_owned)
    }

    async fn write(
        &self,
        message: &NormalizedMessage,
        collection: &str,
    ) -> Result<WriteOutcome, WriteError> {
        let transaction_id = message.transaction_id();
        let identifier = self.extractor.extract(message.body())?;
        info!(
            transaction_id,
            uuid = identifier.as_str(),
            collection,
            "start processing native publish event"
        );

        let body = message.to_json()?;
        let url = self
            .url(&format!("/{}/{}", collection, identifier))
            .map_err(WriteError::ParseUrlError)?;
        let method = if message.is_partial() {
            Method::PATCH
        } else {
            Method::POST
        };

        let mut headers: HeaderMap = message
            .headers()
            .try_into()
            .map_err(WriteError::ParseHeadersError)?;
        if headers
            .get(header::CONTENT_TYPE)
            .map_or(true, HeaderValue::is_empty)
        {
            warn!(
                transaction_id,
                uuid = identifier.as_str(),
                "native-save request does not have content-type header, defaulting to application/json"
            );
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        if headers
            .get(ORIGIN_SYSTEM_ID_HEADER)
            .map_or(true, HeaderValue::is_empty)
        {
            warn!(
                transaction_id,
                uuid = identifier.as_str(),
                "native-save request does not have Origin-System-Id header"
            );
        }

        let now = tokio::time::Instant::now();
        let response = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(WriteError::StorageWriteFailed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(WriteError::StorageWriteRejected(status));
        }

        let updated_content = response
            .bytes()
            .await
            .map_err(WriteError::StorageWriteFailed)?;

        let label = if method == Method::PATCH { "PATCH" } else { "POST" };
        report_write_duration(collection, label, now.elapsed().as_secs_f64());
        info!(
            transaction_id,
            uuid = identifier.as_str(),
            collection,
            "successfully finished processing native publish event"
        );

        Ok(WriteOutcome {
            identifier,
            updated_content,
        })
    }

    async fn check_live(&self) -> Result<String, LivenessError> {
        let url = self.url(GTG_PATH).map_err(LivenessError::InvalidUrl)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(LivenessError::Unreachable)?;

        if !response.status().is_success() {
            return Err(LivenessError::NotGoodToGo(response.status()));
        }

        Ok("Native writer is good to go.".to_owned())
    }
}
