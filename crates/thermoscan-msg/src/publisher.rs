//! ---
//! tsc_section: "02-messaging-ipc-data-model"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Command envelopes, topics, and publish transports."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::{Message, Result, Topics, Transport};

/// Snapshot of publish counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublisherMetrics {
    /// Messages accepted by a transport.
    pub sent: u64,
    /// Messages a transport refused.
    pub dropped: u64,
}

struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> PublisherMetrics {
        PublisherMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Fans outbound messages out to every registered transport.
///
/// A failing transport is logged and counted; it never fails the publish for
/// the others, and nothing is retried.
pub struct Publisher {
    topics: Topics,
    transports: Vec<Arc<dyn Transport>>,
    counters: Counters,
}

impl Publisher {
    /// Create a publisher with no transports.
    pub fn new(topics: Topics) -> Self {
        Self {
            topics,
            transports: Vec::new(),
            counters: Counters::new(),
        }
    }

    /// Register a transport for publish operations.
    pub fn register_transport<T>(&mut self, transport: Arc<T>)
    where
        T: Transport + 'static,
    {
        self.transports.push(transport as Arc<dyn Transport>);
    }

    /// Builder-style [`Publisher::register_transport`].
    pub fn with_transport<T>(mut self, transport: Arc<T>) -> Self
    where
        T: Transport + 'static,
    {
        self.register_transport(transport);
        self
    }

    /// Topic layout used by this publisher.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Serialize `payload` and publish it on `topic`.
    pub fn publish<P: Serialize>(&self, topic: &str, payload: &P, retain: bool) -> Result<()> {
        let value = serde_json::to_value(payload)?;
        let message = Message::new(topic, value, retain);
        for transport in &self.transports {
            if let Err(err) = transport.send(message.clone()) {
                tracing::warn!(transport = transport.name(), topic, error = %err, "transport send failed");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Return the current counter snapshot.
    pub fn metrics(&self) -> PublisherMetrics {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topics", &self.topics)
            .field("transports", &self.transports.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use crate::MessagingError;
    use serde_json::json;

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn send(&self, _msg: Message) -> Result<()> {
            Err(MessagingError::ChannelClosed)
        }

        fn name(&self) -> &'static str {
            "refusing"
        }
    }

    #[test]
    fn publish_reaches_every_transport() {
        let first = Arc::new(InMemoryTransport::new());
        let second = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::new(Topics::default())
            .with_transport(first.clone())
            .with_transport(second.clone());

        let topic = publisher.topics().state();
        publisher
            .publish(&topic, &json!({"running": 1}), true)
            .unwrap();

        assert_eq!(first.on_topic(&topic).len(), 1);
        assert_eq!(second.on_topic(&topic).len(), 1);
        assert_eq!(publisher.metrics().sent, 2);
    }

    #[test]
    fn failing_transport_is_counted_not_fatal() {
        let healthy = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::new(Topics::default())
            .with_transport(Arc::new(RefusingTransport))
            .with_transport(healthy.clone());

        publisher.publish("/thermalcamera/switch", &true, false).unwrap();

        assert_eq!(healthy.len(), 1);
        assert_eq!(
            publisher.metrics(),
            PublisherMetrics {
                sent: 1,
                dropped: 1
            }
        );
    }
}
