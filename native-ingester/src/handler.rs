use std::sync::Arc;

use bytes::Bytes;
use native_common::message::InboundEvent;
use native_common::metrics::{report_forward, report_message_outcome};
use tracing::{error, info, warn};

use crate::producer::Publisher;
use crate::writer::Writer;

/// Why a message was dropped without being fully handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The event could not be turned into a native message.
    InvalidEvent,
    WriteFailed,
    /// The content was written but could not be forwarded.
    ForwardFailed,
}

/// How handling a single message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Written { identifier: String },
    Forwarded { identifier: String },
    /// No routing rule accepts the message.
    Skipped,
    Dropped(DropReason),
}

impl HandleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            HandleOutcome::Written { .. } => "written",
            HandleOutcome::Forwarded { .. } => "forwarded",
            HandleOutcome::Skipped => "skipped",
            HandleOutcome::Dropped(DropReason::InvalidEvent) => "invalid_event",
            HandleOutcome::Dropped(DropReason::WriteFailed) => "write_failed",
            HandleOutcome::Dropped(DropReason::ForwardFailed) => "forward_failed",
        }
    }
}

/// The event to forward after a successful write: partial updates carry the
/// content returned by the store, anything else keeps the consumed body.
/// Headers are the consumed header map in both cases, see `Publisher::send`.
pub fn forward_event(event: &InboundEvent, partial: bool, updated_content: Bytes) -> InboundEvent {
    if partial {
        event.with_body(updated_content)
    } else {
        event.clone()
    }
}

/// Handles consumed events one at a time: normalize, route, write, then forward.
/// Holds no state across messages, so it can be shared by concurrent consumers.
pub struct MessageHandler {
    writer: Arc<dyn Writer>,
    publisher: Option<Arc<dyn Publisher>>,
    /// Kind of content handled, used in logs.
    content_type: String,
}

impl MessageHandler {
    pub fn new(writer: Arc<dyn Writer>, content_type: &str) -> Self {
        Self {
            writer,
            publisher: None,
            content_type: content_type.to_owned(),
        }
    }

    /// Forward every successfully written message with this publisher.
    pub fn forward_to(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn forwards(&self) -> bool {
        self.publisher.is_some()
    }

    pub async fn handle(&self, event: InboundEvent) -> HandleOutcome {
        let outcome = self.process(event).await;
        report_message_outcome(outcome.label());
        outcome
    }

    async fn process(&self, event: InboundEvent) -> HandleOutcome {
        let transaction_id = event.transaction_id();

        let message = match event.normalize() {
            Ok(message) => message,
            Err(e) => {
                error!(
                    transaction_id,
                    content_type = self.content_type.as_str(),
                    "error unmarshalling the publication event: {}",
                    e
                );
                return HandleOutcome::Dropped(DropReason::InvalidEvent);
            }
        };

        let origin_system_id = message.origin_system_id();
        let content_type = message.content_type();
        let Some(collection) =
            self.writer
                .resolve(origin_system_id, content_type, &message.publications())
        else {
            warn!(
                transaction_id,
                origin_system_id,
                content_type,
                "skipping content because of not whitelisted combination (origin system ID, content type, publication)"
            );
            return HandleOutcome::Skipped;
        };

        let written = match self.writer.write(&message, &collection).await {
            Ok(written) => written,
            Err(e) => {
                error!(
                    transaction_id,
                    collection = collection.as_str(),
                    "failed to write native content: {}",
                    e
                );
                return HandleOutcome::Dropped(DropReason::WriteFailed);
            }
        };
        let identifier = written.identifier;

        let Some(publisher) = &self.publisher else {
            info!(
                transaction_id,
                uuid = identifier.as_str(),
                content_type = self.content_type.as_str(),
                "successfully ingested"
            );
            return HandleOutcome::Written { identifier };
        };

        info!(
            transaction_id,
            uuid = identifier.as_str(),
            "forwarding consumed message to a different queue"
        );
        let forwarded = forward_event(&event, message.is_partial(), written.updated_content);
        if let Err(e) = publisher.send(forwarded).await {
            report_forward("failure");
            error!(
                transaction_id,
                uuid = identifier.as_str(),
                "failed to forward consumed message to a different queue: {}",
                e
            );
            return HandleOutcome::Dropped(DropReason::ForwardFailed);
        }
        report_forward("success");

        info!(
            transaction_id,
            uuid = identifier.as_str(),
            content_type = self.content_type.as_str(),
            "successfully ingested"
        );
        HandleOutcome::Forwarded { identifier }
    }
}
