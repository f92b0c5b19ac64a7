use crate::domain::events::{DomainEvent, EventEnvelope};
use crate::domain::ports::EventPublisherRef;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fire-and-forget bridge to the notification dispatcher.
///
/// Publishing failures and timeouts are logged and swallowed; they never
/// reach the caller of a financial operation.
#[derive(Clone)]
pub struct Notifier {
    publisher: EventPublisherRef,
    admin_recipient: String,
    timeout: Duration,
}

impl Notifier {
    pub fn new(publisher: EventPublisherRef, admin_recipient: String, timeout: Duration) -> Self {
        Self {
            publisher,
            admin_recipient,
            timeout,
        }
    }

    pub async fn emit(&self, event: DomainEvent) {
        let name = event.name();
        let envelope = EventEnvelope::new(event, &self.admin_recipient, Utc::now());
        let id = envelope.id;
        match tokio::time::timeout(self.timeout, self.publisher.publish(envelope)).await {
            Ok(Ok(())) => debug!(event = name, %id, "event published"),
            Ok(Err(e)) => warn!(event = name, %id, error = %e, "failed to publish event"),
            Err(_) => warn!(event = name, %id, "timed out publishing event"),
        }
    }

    pub async fn emit_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}
