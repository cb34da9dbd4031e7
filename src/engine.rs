//! Completion request engine.
//!
//! Exactly one completion request may be in flight. A new trigger aborts
//! the previous request before issuing its own (supersede, not queue), so
//! a superseded request's eventual result never reaches the log. Transport
//! failures retry up to a bounded count and then degrade to a visible
//! apology instead of crashing; tool calls are dispatched in emitted order
//! and any `follow_up`-flagged result chains straight into the next
//! completion without waiting for the scheduler.
//!
//! The engine plays two roles around the scheduler: it observes appended
//! batches to decide when to request a completion, and it produces its own
//! results through an outbox drained on the next poll tick.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use async_trait::async_trait;
use flume::Sender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::circumstance::SceneProgress;
use crate::events::OrchestratorEvent;
use crate::llm::{CompletionApi, CompletionOutcome, CompletionRequest};
use crate::log::ConversationLog;
use crate::message::{Message, Role};
use crate::phrase::PhraseMatcher;
use crate::scheduler::{MessageObserver, MessageProducer};

const APOLOGY: &str =
    "I'm sorry — I'm having trouble reaching my language service right now. \
     Please give me a moment and try again.";

/// How the engine decides whether a batch warrants a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    /// Always-listen: any new user message triggers a request.
    Active,
    /// Passive: only the wake phrase (or an explicit follow-up flag)
    /// triggers a request.
    WakeWord,
}

impl InteractionMode {
    pub fn from_config(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "wake_word" => Ok(Self::WakeWord),
            other => anyhow::bail!("unknown interaction mode {:?}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Transport attempts per request before degrading to the apology.
    pub max_attempts: u32,
    /// Bound on follow-up chaining within one trigger.
    pub max_chain_depth: u32,
}

/// Everything a request task needs, detached from the engine so the task
/// survives as a plain `tokio::spawn` with an abortable handle.
#[derive(Clone)]
struct RequestContext {
    api: Arc<dyn CompletionApi>,
    log: Arc<ConversationLog>,
    scenes: Arc<SceneProgress>,
    settings: EngineSettings,
    outbox: Arc<StdMutex<Vec<Message>>>,
    events: Sender<OrchestratorEvent>,
}

pub struct CompletionEngine {
    ctx: RequestContext,
    mode: InteractionMode,
    wake: PhraseMatcher,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionEngine {
    pub fn new(
        api: Arc<dyn CompletionApi>,
        log: Arc<ConversationLog>,
        scenes: Arc<SceneProgress>,
        mode: InteractionMode,
        wake_phrase: &str,
        settings: EngineSettings,
        events: Sender<OrchestratorEvent>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            ctx: RequestContext {
                api,
                log,
                scenes,
                settings,
                outbox: Arc::new(StdMutex::new(Vec::new())),
                events,
            },
            mode,
            wake: PhraseMatcher::new(wake_phrase)?,
            in_flight: Mutex::new(None),
        }))
    }

    /// Trigger policy. The engine's own output (assistant messages, tool
    /// results, synthesized error notices) never re-triggers it.
    fn should_trigger(&self, batch: &[Message]) -> bool {
        for message in batch {
            if message.follow_up {
                return true;
            }
            if message.role != Role::User {
                continue;
            }
            match self.mode {
                InteractionMode::Active => return true,
                InteractionMode::WakeWord => {
                    if self.wake.matches_unquoted(message.text()) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Issue a completion request, superseding any request in flight.
    pub async fn trigger(&self) {
        let ctx = self.ctx.clone();
        let mut in_flight = self.in_flight.lock().await;
        if let Some(previous) = in_flight.take() {
            if !previous.is_finished() {
                tracing::debug!("Superseding in-flight completion request");
            }
            previous.abort();
        }
        *in_flight = Some(tokio::spawn(async move { ctx.run().await }));
    }

    /// Wait for the current request (if any) to settle. Used in tests and
    /// at shutdown.
    pub async fn wait_for_idle(&self) {
        let handle = self.in_flight.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl MessageObserver for CompletionEngine {
    async fn on_new_messages(&self, messages: &[Message]) {
        if self.should_trigger(messages) {
            self.trigger().await;
        }
    }
}

#[async_trait]
impl MessageProducer for CompletionEngine {
    fn name(&self) -> &str {
        "completion-engine"
    }

    /// Drain the outbox. Follow-up flags were already honored inside the
    /// request task, so they are stripped before the messages circulate.
    async fn get_new_messages(&self) -> Result<Vec<Message>> {
        let mut drained = std::mem::take(&mut *self.ctx.outbox.lock().unwrap());
        for message in &mut drained {
            message.follow_up = false;
        }
        Ok(drained)
    }
}

impl RequestContext {
    async fn run(self) {
        // Messages produced by this request, not yet visible to the log;
        // follow-up requests must still see them.
        let mut pending: Vec<Message> = Vec::new();

        for round in 0..self.settings.max_chain_depth {
            let mut messages = self.log.snapshot().await;
            messages.extend(pending.iter().cloned());
            // Active tool set comes from the current scene at request time.
            let tools = self.scenes.current().tool_set().definitions();

            let request = CompletionRequest {
                model: self.settings.model.clone(),
                messages,
                tools,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            };

            let outcome = match self.complete_with_retry(&request).await {
                Some(outcome) => outcome,
                None => {
                    let _ = self.events.send(OrchestratorEvent::ServiceDegraded(format!(
                        "completion failed after {} attempt(s)",
                        self.settings.max_attempts
                    )));
                    pending.push(Message::assistant(APOLOGY));
                    break;
                }
            };

            match outcome {
                CompletionOutcome::ApiError(text) => {
                    tracing::warn!("Completion service returned an error payload: {}", text);
                    pending.push(Message::system(format!(
                        "The completion service reported an error: {}",
                        text
                    )));
                    break;
                }
                CompletionOutcome::Assistant(assistant) => {
                    if !assistant.has_tool_calls() {
                        pending.push(assistant);
                        break;
                    }

                    // Re-read the active set at dispatch time; a scene
                    // transition may have happened since the request was
                    // built.
                    let active = self.scenes.current().tool_set();
                    let results = active.dispatch(&assistant).await;
                    for (call, result) in assistant
                        .tool_calls
                        .iter()
                        .flatten()
                        .zip(results.iter())
                    {
                        let _ = self.events.send(OrchestratorEvent::ToolResolved {
                            name: call.function.name.clone(),
                            output: preview(result.text()),
                        });
                    }

                    let chain = assistant.follow_up || results.iter().any(|m| m.follow_up);
                    pending.push(assistant);
                    pending.extend(results);

                    if !chain {
                        break;
                    }
                    if round + 1 == self.settings.max_chain_depth {
                        tracing::warn!(
                            "Follow-up chain hit its depth limit ({})",
                            self.settings.max_chain_depth
                        );
                    }
                }
            }
        }

        self.outbox.lock().unwrap().extend(pending);
    }

    async fn complete_with_retry(&self, request: &CompletionRequest) -> Option<CompletionOutcome> {
        for attempt in 1..=self.settings.max_attempts {
            match self.api.complete(request).await {
                Ok(outcome) => return Some(outcome),
                Err(e) => {
                    tracing::warn!(
                        "Completion attempt {}/{} failed: {:#}",
                        attempt,
                        self.settings.max_attempts,
                        e
                    );
                }
            }
        }
        None
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    }
}
