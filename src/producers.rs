use crate::message::Message;
use crate::scheduler::MessageProducer;
use anyhow::Result;
use async_trait::async_trait;
use std::io::BufRead;
use std::sync::Arc;

/// Feeds lines typed on stdin into the conversation as user messages.
///
/// Stands in for an external transcription front end: anything that can
/// deliver text lines can play this role. Reading happens on a dedicated
/// blocking thread so the async scheduler never waits on the terminal.
pub struct StdinLineProducer {
    rx: flume::Receiver<String>,
}

impl StdinLineProducer {
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = flume::unbounded();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(text) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        if tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        });
        Arc::new(Self { rx })
    }

    #[cfg(test)]
    fn from_channel(rx: flume::Receiver<String>) -> Arc<Self> {
        Arc::new(Self { rx })
    }
}

#[async_trait]
impl MessageProducer for StdinLineProducer {
    fn name(&self) -> &str {
        "stdin"
    }

    async fn get_new_messages(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            messages.push(Message::user(line.trim()));
        }
        Ok(messages)
    }
}
