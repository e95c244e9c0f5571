//! Pluggable pub/sub broker capability.
//!
//! A [`Broker`] knows how to open a [`Subscription`] for a source and how to
//! pull [`MessageMetadata`] out of its own messages. Concrete wire protocols
//! live behind this seam; the runner only ever talks to the traits.

pub mod memory;
pub mod registry;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use streaming_runner_core::{MessageMetadata, SourceDefinition, StreamingConfig};
use tokio_util::sync::CancellationToken;

pub use memory::MemoryBroker;
pub use registry::BrokerRegistry;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Broker-side settlement of a received message.
pub trait Acker: Send + Sync {
    /// Confirm processing. The broker may discard the message.
    fn ack(self: Box<Self>);

    /// Reject the message. Only called when [`Acker::nackable`] is true.
    fn nack(self: Box<Self>);

    /// Whether the broker supports negative acknowledgement.
    fn nackable(&self) -> bool {
        false
    }
}

/// One message received from a subscription.
///
/// Settling consumes the message, so it can be acknowledged or rejected at
/// most once. Dropping an unsettled message leaves redelivery to the broker.
pub struct Message {
    pub body: Bytes,
    /// Key/value headers as delivered by the broker.
    pub metadata: HashMap<String, String>,
    native: Option<Box<dyn Any + Send + Sync>>,
    acker: Box<dyn Acker>,
}

impl Message {
    #[must_use]
    pub fn new(
        body: impl Into<Bytes>,
        metadata: HashMap<String, String>,
        acker: impl Acker + 'static,
    ) -> Self {
        Self {
            body: body.into(),
            metadata,
            native: None,
            acker: Box::new(acker),
        }
    }

    /// Attaches a broker-native record, later read back via [`Message::native`].
    #[must_use]
    pub fn with_native(mut self, native: impl Any + Send + Sync) -> Self {
        self.native = Some(Box::new(native));
        self
    }

    /// Returns the broker-native record if it has type `T`.
    #[must_use]
    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.as_ref().and_then(|n| n.downcast_ref::<T>())
    }

    pub fn ack(self) {
        self.acker.ack();
    }

    /// Negatively acknowledge. Callers check [`Message::nackable`] first.
    pub fn nack(self) {
        self.acker.nack();
    }

    #[must_use]
    pub fn nackable(&self) -> bool {
        self.acker.nackable()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("body_len", &self.body.len())
            .field("metadata", &self.metadata)
            .field("nackable", &self.nackable())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Subscription / Broker
// ---------------------------------------------------------------------------

/// Live subscription bound to one generation.
///
/// Shared by all workers of the generation; implementations must support
/// concurrent `receive` calls.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Wait for the next message. Must return an error promptly once `scope`
    /// (or the subscription's own scope) is cancelled.
    async fn receive(&self, scope: &CancellationToken) -> anyhow::Result<Message>;

    /// Release broker-side resources. Safe to call more than once.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Broker capability bundle, registered once per kind.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Kind name used for registry lookup (e.g. `"kafka"`, `"memory"`).
    fn kind(&self) -> &str;

    /// Open a subscription for `source`.
    ///
    /// Returns the subscription together with a child scope of `scope`. Once
    /// that child scope is cancelled, pending and future `receive` calls fail.
    async fn subscribe(
        &self,
        scope: &CancellationToken,
        source: &SourceDefinition,
        config: &StreamingConfig,
    ) -> anyhow::Result<(CancellationToken, Arc<dyn Subscription>)>;

    /// Pure, non-blocking metadata extraction.
    fn extract_metadata(&self, message: &Message) -> MessageMetadata;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct CountingAcker {
        acks: Arc<AtomicU32>,
        nacks: Arc<AtomicU32>,
        nackable: bool,
    }

    impl Acker for CountingAcker {
        fn ack(self: Box<Self>) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }
        fn nack(self: Box<Self>) {
            self.nacks.fetch_add(1, Ordering::SeqCst);
        }
        fn nackable(&self) -> bool {
            self.nackable
        }
    }

    fn message(nackable: bool) -> (Message, Arc<AtomicU32>, Arc<AtomicU32>) {
        let acks = Arc::new(AtomicU32::new(0));
        let nacks = Arc::new(AtomicU32::new(0));
        let msg = Message::new(
            "body",
            HashMap::new(),
            CountingAcker {
                acks: acks.clone(),
                nacks: nacks.clone(),
                nackable,
            },
        );
        (msg, acks, nacks)
    }

    #[test]
    fn ack_settles_once() {
        let (msg, acks, nacks) = message(true);
        msg.ack();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(nacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nack_reaches_acker() {
        let (msg, acks, nacks) = message(true);
        assert!(msg.nackable());
        msg.nack();
        assert_eq!(acks.load(Ordering::SeqCst), 0);
        assert_eq!(nacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nackable_defaults_to_false() {
        struct Plain;
        impl Acker for Plain {
            fn ack(self: Box<Self>) {}
            fn nack(self: Box<Self>) {}
        }
        let msg = Message::new(Bytes::new(), HashMap::new(), Plain);
        assert!(!msg.nackable());
    }

    #[test]
    fn native_record_downcasts_by_type() {
        let (msg, _, _) = message(false);
        let msg = msg.with_native(42_u64);
        assert_eq!(msg.native::<u64>(), Some(&42));
        assert!(msg.native::<String>().is_none());
    }
}
