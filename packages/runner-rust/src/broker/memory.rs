//! In-process broker.
//!
//! Topics are unbounded queues shared by every subscription on the same topic
//! name, so concurrent workers compete for messages the way consumers of one
//! queue group would. Used for local runs and throughout the test suite.
//!
//! Config keys: `topic` (required).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use streaming_runner_core::{now_millis, MessageMetadata, SourceDefinition, StreamingConfig};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Acker, Broker, Message, Subscription};

/// Kind name of the in-process broker.
pub const MEMORY_BROKER_KIND: &str = "memory";

/// Broker-native record attached to every memory message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub id: String,
    pub published_at_millis: u64,
    pub topic: String,
}

#[derive(Debug, Clone)]
struct Queued {
    record: MemoryRecord,
    body: Bytes,
    metadata: HashMap<String, String>,
}

/// Settlement counters of one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
}

struct Topic {
    name: String,
    tx: mpsc::UnboundedSender<Queued>,
    rx: Mutex<mpsc::UnboundedReceiver<Queued>>,
    closed: CancellationToken,
    counters: Arc<Counters>,
}

impl Topic {
    fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
        }
    }
}

/// Acker for messages that need no settlement.
#[derive(Debug, Clone, Copy)]
pub struct NoopAcker;

impl Acker for NoopAcker {
    fn ack(self: Box<Self>) {}
    fn nack(self: Box<Self>) {}
}

struct MemoryAcker {
    queued: Queued,
    requeue: Option<mpsc::UnboundedSender<Queued>>,
    nackable: bool,
    counters: Arc<Counters>,
}

impl Acker for MemoryAcker {
    fn ack(self: Box<Self>) {
        self.counters.acked.fetch_add(1, Ordering::Relaxed);
    }

    fn nack(self: Box<Self>) {
        let this = *self;
        this.counters.nacked.fetch_add(1, Ordering::Relaxed);
        if let Some(tx) = this.requeue {
            // Send fails only when the topic is gone, then there is no one to redeliver to.
            let _ = tx.send(this.queued);
        }
    }

    fn nackable(&self) -> bool {
        self.nackable
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// In-process broker keyed by topic name.
pub struct MemoryBroker {
    topics: DashMap<String, Arc<Topic>>,
    redeliver_on_nack: bool,
    nackable: bool,
}

impl MemoryBroker {
    /// Creates a broker that redelivers negatively acknowledged messages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            redeliver_on_nack: true,
            nackable: true,
        }
    }

    /// Creates a broker that counts nacks but drops the rejected messages.
    #[must_use]
    pub fn without_redelivery() -> Self {
        Self {
            redeliver_on_nack: false,
            ..Self::new()
        }
    }

    /// Creates a broker whose messages can only be acknowledged.
    #[must_use]
    pub fn ack_only() -> Self {
        Self {
            redeliver_on_nack: false,
            nackable: false,
            ..Self::new()
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name)))
            .clone()
    }

    /// Publish a message and return its id: the `id` header when present,
    /// otherwise a fresh UUID.
    pub fn publish(
        &self,
        topic: &str,
        body: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) -> String {
        let topic = self.topic(topic);
        let record = MemoryRecord {
            id: metadata
                .get("id")
                .filter(|id| !id.is_empty())
                .cloned()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            published_at_millis: now_millis(),
            topic: topic.name.clone(),
        };
        let id = record.id.clone();
        topic.counters.published.fetch_add(1, Ordering::Relaxed);
        // The topic owns its receiver, so the channel cannot be closed here.
        let _ = topic.tx.send(Queued {
            record,
            body: body.into(),
            metadata,
        });
        id
    }

    /// Close a topic: every pending and future `receive` on it fails.
    pub fn close(&self, topic: &str) {
        if let Some(t) = self.topics.get(topic) {
            t.closed.cancel();
        }
    }

    /// Settlement counters for a topic (all zero for unknown topics).
    #[must_use]
    pub fn stats(&self, topic: &str) -> TopicStats {
        self.topics
            .get(topic)
            .map(|t| TopicStats {
                published: t.counters.published.load(Ordering::Relaxed),
                acked: t.counters.acked.load(Ordering::Relaxed),
                nacked: t.counters.nacked.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &str {
        MEMORY_BROKER_KIND
    }

    async fn subscribe(
        &self,
        scope: &CancellationToken,
        source: &SourceDefinition,
        config: &StreamingConfig,
    ) -> anyhow::Result<(CancellationToken, Arc<dyn Subscription>)> {
        let name = config
            .broker_config
            .get("topic")
            .and_then(serde_json::Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("memory broker config requires a `topic`"))?;

        let topic = self.topic(name);
        if topic.closed.is_cancelled() {
            anyhow::bail!("topic {name} is closed");
        }

        let child = scope.child_token();
        debug!(source = %source.key(), topic = name, "memory subscription opened");
        let subscription = MemorySubscription {
            topic,
            scope: child.clone(),
            requeue: self.redeliver_on_nack,
            nackable: self.nackable,
            shut_down: AtomicBool::new(false),
        };
        Ok((child, Arc::new(subscription)))
    }

    fn extract_metadata(&self, message: &Message) -> MessageMetadata {
        match message.native::<MemoryRecord>() {
            Some(record) => MessageMetadata {
                id: record.id.clone(),
                timestamp_millis: record.published_at_millis,
                topic: record.topic.clone(),
            },
            None => MessageMetadata {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp_millis: now_millis(),
                topic: String::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySubscription
// ---------------------------------------------------------------------------

struct MemorySubscription {
    topic: Arc<Topic>,
    scope: CancellationToken,
    requeue: bool,
    nackable: bool,
    shut_down: AtomicBool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&self, scope: &CancellationToken) -> anyhow::Result<Message> {
        let next = async {
            let mut rx = self.topic.rx.lock().await;
            rx.recv().await
        };

        let queued = tokio::select! {
            biased;
            () = scope.cancelled() => anyhow::bail!("subscription cancelled"),
            () = self.scope.cancelled() => anyhow::bail!("subscription shut down"),
            () = self.topic.closed.cancelled() => anyhow::bail!("topic {} closed", self.topic.name),
            queued = next => queued.ok_or_else(|| anyhow::anyhow!("topic {} closed", self.topic.name))?,
        };

        let acker = MemoryAcker {
            queued: queued.clone(),
            requeue: self.requeue.then(|| self.topic.tx.clone()),
            nackable: self.nackable,
            counters: Arc::clone(&self.topic.counters),
        };
        Ok(Message::new(queued.body, queued.metadata, acker).with_native(queued.record))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            self.scope.cancel();
            debug!(topic = %self.topic.name, "memory subscription shut down");
        }
        Ok(())
    }
}
