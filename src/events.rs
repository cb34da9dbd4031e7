//! Outbound event channel for whatever front-end is attached (console,
//! speech, telemetry). The orchestrator core never blocks on the receiver.

use std::sync::Arc;

use async_trait::async_trait;
use flume::Sender;

use crate::message::{Message, Role};
use crate::scheduler::MessageObserver;

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The assistant produced visible text.
    AssistantSaid(String),
    /// A tool call resolved (name and a preview of its output).
    ToolResolved { name: String, output: String },
    /// The completion service is degraded; a fallback reply was used.
    ServiceDegraded(String),
}

/// Forwards appended assistant messages onto the event channel.
pub struct EventSinkObserver {
    tx: Sender<OrchestratorEvent>,
}

impl EventSinkObserver {
    pub fn new(tx: Sender<OrchestratorEvent>) -> Arc<Self> {
        Arc::new(Self { tx })
    }
}

#[async_trait]
impl MessageObserver for EventSinkObserver {
    async fn on_new_messages(&self, messages: &[Message]) {
        for message in messages {
            if message.role == Role::Assistant && !message.text().is_empty() {
                let _ = self
                    .tx
                    .send(OrchestratorEvent::AssistantSaid(message.text().to_string()));
            }
        }
    }
}
