use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const TRANSACTION_ID_HEADER: &str = "X-Request-Id";
pub const MESSAGE_TIMESTAMP_HEADER: &str = "Message-Timestamp";
pub const ORIGIN_SYSTEM_ID_HEADER: &str = "Origin-System-Id";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const MESSAGE_TYPE_HEADER: &str = "Message-Type";
pub const SCHEMA_VERSION_HEADER: &str = "X-Schema-Version";
pub const CONTENT_REVISION_HEADER: &str = "X-Content-Revision";
/// Hash of the native content, as set by the publishing system.
pub const NATIVE_HASH_HEADER: &str = "Native-Hash";
/// Hash of the native content, as expected by the storage service.
pub const STORAGE_HASH_HEADER: &str = "X-Native-Hash";

/// Message type of publications that only carry part of a content.
pub const PARTIAL_CONTENT_PUBLISHED: &str = "cms-partial-content-published";

pub const LAST_MODIFIED_FIELD: &str = "lastModified";
pub const PUBLISH_REFERENCE_FIELD: &str = "publishReference";
/// Body field listing the publications a content belongs to.
pub const PUBLICATION_FIELD: &str = "publication";

/// Headers copied from the consumed event to the storage request, when present.
const COPIED_HEADERS: [&str; 4] = [
    CONTENT_TYPE_HEADER,
    ORIGIN_SYSTEM_ID_HEADER,
    SCHEMA_VERSION_HEADER,
    CONTENT_REVISION_HEADER,
];

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("publish event does not contain timestamp")]
    MissingTimestamp,
    #[error("failed to parse content body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// A publication event as consumed from Kafka: string headers and a raw body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEvent {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl InboundEvent {
    pub fn new(headers: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    fn trimmed_header(&self, name: &str) -> &str {
        self.headers.get(name).map(|v| v.trim()).unwrap_or_default()
    }

    pub fn transaction_id(&self) -> &str {
        self.headers
            .get(TRANSACTION_ID_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn origin_system_id(&self) -> &str {
        self.trimmed_header(ORIGIN_SYSTEM_ID_HEADER)
    }

    /// Content type as published. Routing patterns see it unchanged.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn message_type(&self) -> &str {
        self.trimmed_header(MESSAGE_TYPE_HEADER)
    }

    /// The same event with its body replaced, headers untouched.
    pub fn with_body(&self, body: impl Into<Bytes>) -> Self {
        Self {
            headers: self.headers.clone(),
            body: body.into(),
        }
    }

    /// Build the message sent to the storage service from this event.
    ///
    /// The body must be a JSON object; `lastModified` and `publishReference` are
    /// injected from the timestamp and transaction id headers, replacing any
    /// existing values.
    pub fn normalize(&self) -> Result<NormalizedMessage, NormalizeError> {
        let timestamp = self
            .headers
            .get(MESSAGE_TIMESTAMP_HEADER)
            .ok_or(NormalizeError::MissingTimestamp)?;
        let transaction_id = self.transaction_id();

        let mut body: Map<String, Value> = serde_json::from_slice(&self.body)?;
        body.insert(
            LAST_MODIFIED_FIELD.to_owned(),
            Value::String(timestamp.clone()),
        );
        body.insert(
            PUBLISH_REFERENCE_FIELD.to_owned(),
            Value::String(transaction_id.to_owned()),
        );

        let mut headers = HashMap::new();
        headers.insert(TRANSACTION_ID_HEADER.to_owned(), transaction_id.to_owned());
        headers.insert(
            MESSAGE_TYPE_HEADER.to_owned(),
            self.message_type().to_owned(),
        );
        if let Some(hash) = self.headers.get(NATIVE_HASH_HEADER) {
            headers.insert(STORAGE_HASH_HEADER.to_owned(), hash.clone());
        }
        for name in COPIED_HEADERS {
            if let Some(value) = self.headers.get(name) {
                headers.insert(name.to_owned(), value.clone());
            }
        }

        let message = NormalizedMessage { body, headers };
        debug!(
            transaction_id,
            content_type = message.content_type(),
            origin_system_id = message.origin_system_id(),
            "constructed native message"
        );

        Ok(message)
    }
}

/// The message handed to the storage service: the parsed body with its derived
/// fields, and the headers to send along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    body: Map<String, Value>,
    headers: HashMap<String, String>,
}

impl NormalizedMessage {
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .map(|v| v.trim())
            .unwrap_or_default()
    }

    pub fn transaction_id(&self) -> &str {
        self.header(TRANSACTION_ID_HEADER)
    }

    /// Content type as published, surrounding whitespace included.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn origin_system_id(&self) -> &str {
        self.header(ORIGIN_SYSTEM_ID_HEADER)
    }

    pub fn message_type(&self) -> &str {
        self.header(MESSAGE_TYPE_HEADER)
    }

    pub fn is_partial(&self) -> bool {
        self.message_type() == PARTIAL_CONTENT_PUBLISHED
    }

    /// Publications listed in the body. Absent or malformed lists mean no publication.
    pub fn publications(&self) -> HashSet<String> {
        match self.body.get(PUBLICATION_FIELD) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => HashSet::new(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    const TIMESTAMP: &str = "2017-02-16T12:56:16Z";
    const TRANSACTION_ID: &str = "tid_test";
    const CCT: &str = "http://cmdb.ft.com/systems/cct";

    fn headers() -> HashMap<String, String> {
        HashMap::from([
            (CONTENT_TYPE_HEADER.to_owned(), "application/json; version=1.0".to_owned()),
            (TRANSACTION_ID_HEADER.to_owned(), TRANSACTION_ID.to_owned()),
            (MESSAGE_TIMESTAMP_HEADER.to_owned(), TIMESTAMP.to_owned()),
            (ORIGIN_SYSTEM_ID_HEADER.to_owned(), CCT.to_owned()),
        ])
    }

    #[test]
    fn test_injects_derived_fields() {
        let event = InboundEvent::new(
            headers(),
            r#"{"uuid": "572d0acc-3f12-4e70-8830-8092c1042a52", "lastModified": "old", "publishReference": "old"}"#,
        );
        let message = event.normalize().expect("failed to normalize");

        assert_json_eq!(
            Value::Object(message.body().clone()),
            json!({
                "uuid": "572d0acc-3f12-4e70-8830-8092c1042a52",
                "lastModified": TIMESTAMP,
                "publishReference": TRANSACTION_ID
            })
        );
        assert_eq!(message.transaction_id(), TRANSACTION_ID);
        assert_eq!(
            message.headers().get(TRANSACTION_ID_HEADER).map(String::as_str),
            Some(TRANSACTION_ID)
        );
    }

    #[test]
    fn test_copies_headers() {
        let mut headers = headers();
        headers.insert(NATIVE_HASH_HEADER.to_owned(), "27f79e6d".to_owned());
        headers.insert(SCHEMA_VERSION_HEADER.to_owned(), "3".to_owned());
        headers.insert(CONTENT_REVISION_HEADER.to_owned(), "12".to_owned());
        headers.insert("X-Unrelated".to_owned(), "value".to_owned());

        let message = InboundEvent::new(headers, "{}").normalize().unwrap();
        let expected = HashMap::from([
            (TRANSACTION_ID_HEADER.to_owned(), TRANSACTION_ID.to_owned()),
            (MESSAGE_TYPE_HEADER.to_owned(), "".to_owned()),
            (STORAGE_HASH_HEADER.to_owned(), "27f79e6d".to_owned()),
            (CONTENT_TYPE_HEADER.to_owned(), "application/json; version=1.0".to_owned()),
            (ORIGIN_SYSTEM_ID_HEADER.to_owned(), CCT.to_owned()),
            (SCHEMA_VERSION_HEADER.to_owned(), "3".to_owned()),
            (CONTENT_REVISION_HEADER.to_owned(), "12".to_owned()),
        ]);

        assert_eq!(message.headers(), &expected);
        assert_eq!(message.origin_system_id(), CCT);
        assert_eq!(message.content_type(), "application/json; version=1.0");
    }

    #[test]
    fn test_optional_headers_are_skipped() {
        let mut headers = headers();
        headers.remove(CONTENT_TYPE_HEADER);
        headers.remove(ORIGIN_SYSTEM_ID_HEADER);

        let message = InboundEvent::new(headers, "{}").normalize().unwrap();

        assert_eq!(message.headers().len(), 2);
        assert_eq!(message.content_type(), "");
        assert_eq!(message.origin_system_id(), "");
    }

    #[test]
    fn test_missing_timestamp() {
        let mut headers = headers();
        headers.remove(MESSAGE_TIMESTAMP_HEADER);

        assert!(matches!(
            InboundEvent::new(headers, "{}").normalize(),
            Err(NormalizeError::MissingTimestamp)
        ));
    }

    #[test]
    fn test_invalid_body() {
        assert!(matches!(
            InboundEvent::new(headers(), "I am not JSON").normalize(),
            Err(NormalizeError::InvalidBody(_))
        ));
        assert!(matches!(
            InboundEvent::new(headers(), "[1, 2, 3]").normalize(),
            Err(NormalizeError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_partial_content_flag() {
        let mut headers = headers();
        headers.insert(
            MESSAGE_TYPE_HEADER.to_owned(),
            format!(" {PARTIAL_CONTENT_PUBLISHED} "),
        );
        let partial = InboundEvent::new(headers.clone(), "{}").normalize().unwrap();
        assert!(partial.is_partial());

        headers.insert(
            MESSAGE_TYPE_HEADER.to_owned(),
            "cms-content-published".to_owned(),
        );
        let full = InboundEvent::new(headers, "{}").normalize().unwrap();
        assert!(!full.is_partial());
    }

    #[test]
    fn test_publications() {
        let message = InboundEvent::new(
            headers(),
            r#"{"publication": ["pub-1", 42, "pub-2", "pub-1"]}"#,
        )
        .normalize()
        .unwrap();
        assert_eq!(
            message.publications(),
            HashSet::from(["pub-1".to_owned(), "pub-2".to_owned()])
        );

        let message = InboundEvent::new(headers(), r#"{"publication": "pub-1"}"#)
            .normalize()
            .unwrap();
        assert!(message.publications().is_empty());
    }

    #[test]
    fn test_content_type_is_not_trimmed() {
        let mut headers = headers();
        headers.insert(
            CONTENT_TYPE_HEADER.to_owned(),
            " application/json ".to_owned(),
        );
        headers.insert(ORIGIN_SYSTEM_ID_HEADER.to_owned(), format!(" {CCT} "));
        let event = InboundEvent::new(headers, "{}");
        assert_eq!(event.content_type(), " application/json ");

        let message = event.normalize().unwrap();
        assert_eq!(message.content_type(), " application/json ");
        assert_eq!(message.origin_system_id(), CCT);
    }

    #[test]
    fn test_event_accessors_and_with_body() {
        let mut headers = headers();
        headers.insert(ORIGIN_SYSTEM_ID_HEADER.to_owned(), format!("  {CCT}\t"));
        let event = InboundEvent::new(headers, "{}");

        assert_eq!(event.origin_system_id(), CCT);
        assert_eq!(event.transaction_id(), TRANSACTION_ID);

        let replaced = event.with_body("updated");
        assert_eq!(replaced.headers, event.headers);
        assert_eq!(replaced.body, Bytes::from("updated"));
    }
}
