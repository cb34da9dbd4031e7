//! Fixed-cadence polling loop that fans out to message producers and fans
//! the merged batch into the conversation log.
//!
//! Producers are polled concurrently each tick; a single producer failing
//! must not cost the others their results, so the gather is best-effort.
//! Results are concatenated in producer-registration order before one
//! atomic append. A tick error puts the loop into a longer cooldown, but
//! the loop never terminates.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::{sleep, Instant};

use crate::log::ConversationLog;
use crate::message::Message;

/// A source of new conversation messages, polled once per scheduler tick.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Name used in log output when this producer misbehaves.
    fn name(&self) -> &str;

    /// Return any messages produced since the last poll. May return empty.
    async fn get_new_messages(&self) -> Result<Vec<Message>>;
}

/// Notified synchronously, in registration order, after each non-empty
/// append to the conversation log.
#[async_trait]
pub trait MessageObserver: Send + Sync {
    async fn on_new_messages(&self, messages: &[Message]);
}

pub struct Scheduler {
    log: Arc<ConversationLog>,
    producers: Vec<Arc<dyn MessageProducer>>,
    tick_floor: Duration,
    error_cooldown: Duration,
}

impl Scheduler {
    pub fn new(log: Arc<ConversationLog>, tick_floor: Duration, error_cooldown: Duration) -> Self {
        Self {
            log,
            producers: Vec::new(),
            tick_floor,
            error_cooldown,
        }
    }

    pub fn register_producer(&mut self, producer: Arc<dyn MessageProducer>) {
        tracing::info!("Registered message producer: {}", producer.name());
        self.producers.push(producer);
    }

    /// Drive the polling loop forever. Each tick takes at least the
    /// configured floor duration; errors trigger the cooldown instead.
    pub async fn run(&self) {
        tracing::info!(
            "Scheduler starting ({} producer(s), {:?} tick floor)",
            self.producers.len(),
            self.tick_floor
        );

        loop {
            let started = Instant::now();

            if let Err(e) = self.tick().await {
                tracing::error!("Scheduler tick failed: {:#}", e);
                sleep(self.error_cooldown).await;
                continue;
            }

            let elapsed = started.elapsed();
            if elapsed < self.tick_floor {
                sleep(self.tick_floor - elapsed).await;
            }
        }
    }

    /// Poll every producer concurrently and append the merged batch.
    pub async fn tick(&self) -> Result<()> {
        let polls = self.producers.iter().map(|p| p.get_new_messages());
        let results = join_all(polls).await;

        let mut batch = Vec::new();
        for (producer, result) in self.producers.iter().zip(results) {
            match result {
                Ok(messages) => batch.extend(messages),
                Err(e) => {
                    tracing::warn!("Producer '{}' failed this tick: {:#}", producer.name(), e);
                }
            }
        }

        if !batch.is_empty() {
            self.log.append(batch).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedProducer {
        name: String,
        messages: Mutex<Vec<Message>>,
    }

    impl FixedProducer {
        fn new(name: &str, messages: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                messages: Mutex::new(messages),
            })
        }
    }

    #[async_trait]
    impl MessageProducer for FixedProducer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_new_messages(&self) -> Result<Vec<Message>> {
            Ok(std::mem::take(&mut *self.messages.lock().unwrap()))
        }
    }

    struct FailingProducer;

    #[async_trait]
    impl MessageProducer for FailingProducer {
        fn name(&self) -> &str {
            "boom"
        }

        async fn get_new_messages(&self) -> Result<Vec<Message>> {
            anyhow::bail!("producer offline")
        }
    }

    async fn empty_log(dir: &tempfile::TempDir) -> Arc<ConversationLog> {
        ConversationLog::load_or_default(
            dir.path().join("conversation.json"),
            50,
            Message::system("pinned"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn merges_producer_results_in_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = empty_log(&dir).await;

        let mut scheduler = Scheduler::new(
            log.clone(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        scheduler.register_producer(FixedProducer::new("a", vec![Message::user("first")]));
        scheduler.register_producer(FixedProducer::new("b", vec![Message::user("second")]));

        scheduler.tick().await.unwrap();

        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[1].text(), "first");
        assert_eq!(snapshot[2].text(), "second");
    }

    #[tokio::test]
    async fn failing_producer_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let log = empty_log(&dir).await;

        let mut scheduler = Scheduler::new(
            log.clone(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        scheduler.register_producer(Arc::new(FailingProducer));
        scheduler.register_producer(FixedProducer::new("ok", vec![Message::user("survived")]));

        scheduler.tick().await.unwrap();

        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].text(), "survived");
    }

    #[tokio::test]
    async fn empty_tick_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = empty_log(&dir).await;

        let mut scheduler = Scheduler::new(
            log.clone(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        scheduler.register_producer(FixedProducer::new("quiet", vec![]));

        scheduler.tick().await.unwrap();
        assert_eq!(log.snapshot().await.len(), 1);
    }
}
