//! In-process publish/subscribe message bus.
//!
//! The bus routes [`BusMessage`]s between the watcher, the processor, and
//! anything else that registers an interest in a topic. Each topic owns an
//! unbounded flume channel and one delivery task, which gives FIFO delivery
//! per topic with no ordering promise across topics. Publishing enqueues
//! and returns immediately; handler execution never blocks the publisher.
//!
//! A handler that returns an error is logged and skipped — it cannot stall
//! the remaining handlers or later messages. Undelivered messages are lost
//! on shutdown; the watcher's full re-listing at startup makes that safe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::models::ChangeEvent;

/// Topic carrying [`BusMessage::Change`] events from the watcher.
pub const TOPIC_CHANGES: &str = "source.changes";
/// Topic carrying [`BusMessage::Processed`] completions from the processor.
pub const TOPIC_PROCESSED: &str = "document.processed";
/// Topic carrying [`BusMessage::Failed`] errors from the processor.
pub const TOPIC_FAILED: &str = "document.failed";

/// Payload delivered to subscribers.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Change(ChangeEvent),
    Processed {
        source_id: String,
        chunk_count: usize,
    },
    Failed {
        source_id: String,
        error: String,
        /// Whether re-running the document could succeed. Validation skips
        /// are not retryable; transient external failures are.
        retryable: bool,
    },
    /// A whole poll cycle failed before any change could be diffed
    /// (listing the source errored). Carries the source's label, not a
    /// document id.
    PollFailed {
        source: String,
        error: String,
    },
}

/// A topic handler. Handlers for one topic run in registration order;
/// each message is seen exactly once per handler.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn handle(&self, message: &BusMessage) -> Result<(), PipelineError>;
}

struct TopicChannel {
    sender: flume::Sender<BusMessage>,
    handlers: Arc<Mutex<Vec<Arc<dyn Subscriber>>>>,
}

/// Topic-keyed pub/sub router. Construct one instance and hand clones of
/// the `Arc` to each component; there is no implicit global bus.
pub struct MessageBus {
    topics: Mutex<HashMap<String, TopicChannel>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Register `subscriber` for `topic`. The first registration (or the
    /// first publish) on a topic spawns its delivery task.
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) {
        let mut topics = self.topics.lock().expect("bus topics poisoned");
        let channel = topics
            .entry(topic.to_string())
            .or_insert_with(|| spawn_topic(topic));
        channel
            .handlers
            .lock()
            .expect("bus handlers poisoned")
            .push(subscriber);
        debug!(topic, "subscriber registered");
    }

    /// Enqueue `message` for asynchronous delivery to all current
    /// subscribers of `topic`. Returns immediately. A message that reaches
    /// the delivery task while the topic has no subscribers is dropped.
    pub fn publish(&self, topic: &str, message: BusMessage) {
        let mut topics = self.topics.lock().expect("bus topics poisoned");
        let channel = topics
            .entry(topic.to_string())
            .or_insert_with(|| spawn_topic(topic));
        // Unbounded channel: send only fails when the receiver task died,
        // which means the runtime is shutting down.
        if channel.sender.send(message).is_err() {
            warn!(topic, "bus delivery task gone; message dropped");
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_topic(topic: &str) -> TopicChannel {
    let (sender, receiver) = flume::unbounded::<BusMessage>();
    let handlers: Arc<Mutex<Vec<Arc<dyn Subscriber>>>> = Arc::new(Mutex::new(Vec::new()));

    let topic_name = topic.to_string();
    let task_handlers = Arc::clone(&handlers);
    tokio::spawn(async move {
        // Exits when the bus (the only sender) is dropped.
        while let Ok(message) = receiver.recv_async().await {
            let current: Vec<Arc<dyn Subscriber>> = {
                task_handlers
                    .lock()
                    .expect("bus handlers poisoned")
                    .clone()
            };
            if current.is_empty() {
                debug!(topic = %topic_name, "no subscribers; message dropped");
                continue;
            }
            for handler in current {
                if let Err(err) = handler.handle(&message).await {
                    warn!(topic = %topic_name, %err, "subscriber failed; continuing");
                }
            }
        }
        debug!(topic = %topic_name, "delivery task stopped");
    });

    TopicChannel { sender, handlers }
}
