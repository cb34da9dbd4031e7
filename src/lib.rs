//! Emcee: a conversational game-master orchestrator.
//!
//! The crate is organized around a shared append-only [`log::ConversationLog`].
//! A fixed-cadence [`scheduler::Scheduler`] polls [`scheduler::MessageProducer`]s
//! for new messages and appends each batch, fanning it out to registered
//! [`scheduler::MessageObserver`]s. The [`engine::CompletionEngine`] is both:
//! as an observer it decides when a batch warrants an LLM request (always, or
//! only on a wake phrase), and as a producer it hands back the replies and tool
//! results of the request that has since completed. Scenes are modeled by
//! [`circumstance::Circumstance`] implementations that contribute the pinned
//! system prompt and the tool set, advanced by [`circumstance::SceneProgress`].

pub mod circumstance;
pub mod config;
pub mod engine;
pub mod events;
pub mod llm;
pub mod log;
pub mod message;
pub mod phrase;
pub mod producers;
pub mod prompts;
pub mod scheduler;
pub mod tasks;
pub mod tools;
