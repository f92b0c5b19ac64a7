use crate::domain::events::EventEnvelope;
use crate::domain::ports::EventPublisher;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Hands envelopes to an out-of-process dispatcher over a bounded channel.
///
/// `publish` never waits for capacity: a full or closed channel is reported as
/// an error and the caller decides whether to care.
#[derive(Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<EventEnvelope>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        self.sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(env) => {
                EngineError::internal(format!("event channel full, dropped {}", env.event.name()))
            }
            mpsc::error::TrySendError::Closed(env) => {
                EngineError::internal(format!("event channel closed, dropped {}", env.event.name()))
            }
        })
    }
}

/// Writes each envelope as a JSON log line.
#[derive(Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| EngineError::Internal(Box::new(e)))?;
        info!(event = envelope.event.name(), %payload, "domain event");
        Ok(())
    }
}
