//! Append-only conversation log.
//!
//! Slot 0 is reserved for the pinned system message, which is replaced (not
//! appended) whenever the current scene's persona text changes. Appends
//! notify observers synchronously in registration order, then schedule an
//! asynchronous persist; each new append supersedes the previous pending
//! save, so only the latest state races to disk and the latest always wins.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::message::{Message, Role};
use crate::scheduler::MessageObserver;

/// Shape of the persisted log file: a single `messages` array, trimmed to
/// the retention window on every save. The pinned message is excluded; it
/// is regenerated from the current scene at startup.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LogDocument {
    messages: Vec<Message>,
}

pub struct ConversationLog {
    /// Slot 0 is always the pinned system message.
    entries: RwLock<Vec<Message>>,
    observers: RwLock<Vec<Arc<dyn MessageObserver>>>,
    path: PathBuf,
    retention: usize,
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationLog {
    /// Load the persisted history if present, otherwise start empty.
    /// The pinned message always comes from the caller, never from disk.
    pub fn load_or_default(
        path: PathBuf,
        retention: usize,
        pinned: Message,
    ) -> Result<Arc<Self>> {
        let mut entries = vec![pinned];
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read conversation log {:?}", path))?;
            let doc: LogDocument = serde_json::from_str(&raw)
                .with_context(|| format!("corrupt conversation log {:?}", path))?;
            tracing::info!("Loaded {} conversation message(s) from {:?}", doc.messages.len(), path);
            entries.extend(doc.messages);
        } else {
            tracing::info!("No conversation log at {:?}, starting fresh", path);
        }

        Ok(Arc::new(Self {
            entries: RwLock::new(entries),
            observers: RwLock::new(Vec::new()),
            path,
            retention,
            pending_save: Mutex::new(None),
        }))
    }

    pub async fn register_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Append a batch, notify observers in registration order, then schedule
    /// the superseding persist. Empty batches are a no-op.
    pub async fn append(&self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }

        self.entries.write().await.extend(batch.iter().cloned());

        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_new_messages(&batch).await;
        }

        self.schedule_save().await;
    }

    pub async fn replace_pinned(&self, pinned: Message) {
        {
            let mut entries = self.entries.write().await;
            entries[0] = pinned;
        }
        self.schedule_save().await;
    }

    /// Replace the pinned message only when its content actually changed.
    /// Returns whether a replacement happened.
    pub async fn replace_pinned_if_changed(&self, pinned: Message) -> bool {
        {
            let mut entries = self.entries.write().await;
            if entries[0].content == pinned.content {
                return false;
            }
            entries[0] = pinned;
        }
        self.schedule_save().await;
        true
    }

    /// Read-only copy for building a completion request. The pinned system
    /// message is present and first.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.entries.read().await.clone()
    }

    /// Cancel-and-restart persistence: the previous pending save is aborted
    /// because only the latest state needs to hit storage.
    async fn schedule_save(&self) {
        let document = {
            let entries = self.entries.read().await;
            LogDocument {
                messages: persisted_window(&entries[1..], self.retention).to_vec(),
            }
        };

        let json = match serde_json::to_string_pretty(&document) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize conversation log: {}", e);
                return;
            }
        };

        let path = self.path.clone();
        let mut pending = self.pending_save.lock().await;
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            if let Err(e) = tokio::fs::write(&path, json).await {
                tracing::error!("Failed to persist conversation log to {:?}: {}", path, e);
            }
        }));
    }

    /// Wait for any pending save to finish. Used at shutdown and in tests.
    pub async fn flush(&self) {
        let handle = self.pending_save.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Trailing retention window over the history (pinned excluded), further
/// truncated so it never starts mid tool-call sequence: an orphaned
/// tool-role result with no preceding call is invalid on reload.
fn persisted_window(history: &[Message], retention: usize) -> &[Message] {
    let start = history.len().saturating_sub(retention);
    let mut window = &history[start..];
    while let Some(first) = window.first() {
        let mid_sequence = first.role == Role::Tool
            || (first.role == Role::Assistant && first.has_tool_calls());
        if !mid_sequence {
            break;
        }
        window = &window[1..];
    }
    window
}
