//! Where pollers emit new items.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{PollError, PolledItem};
use crate::bus::{Channel, Message, MessageBroker};

/// Receives every new item a poller produces.
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Emits one item.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Sink`] when the item could not be handed over.
    async fn emit(&self, source: &str, item: Arc<PolledItem>) -> Result<(), PollError>;
}

/// Publishes items as [`Message`]s on one bus channel.
pub struct BusSink {
    name: String,
    broker: Arc<dyn MessageBroker>,
    channel: Channel,
}

impl BusSink {
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, channel: Channel) -> Self {
        Self {
            name: format!("bus[{channel}]"),
            broker,
            channel,
        }
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

#[async_trait]
impl ItemSink for BusSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, source: &str, item: Arc<PolledItem>) -> Result<(), PollError> {
        let id = item.id().to_string();
        let delivered = self
            .broker
            .publish(self.channel, Arc::new(Message::item(source, item)))
            .await;
        trace!(channel = %self.channel, item_id = %id, delivered, "emitted item");
        Ok(())
    }
}

/// Bounded in-process queue. Items are dropped, not awaited, when it is full.
pub struct QueueSink {
    name: String,
    sender: mpsc::Sender<Arc<PolledItem>>,
    dropped: AtomicU64,
}

impl QueueSink {
    /// Creates the sink and the receiving end of its queue.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Arc<PolledItem>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            name: name.into(),
            sender,
            dropped: AtomicU64::new(0),
        };
        (sink, receiver)
    }

    /// Number of items dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemSink for QueueSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, _source: &str, item: Arc<PolledItem>) -> Result<(), PollError> {
        match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(item)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(sink = %self.name, item_id = %item.id(), dropped, "queue full, dropping item");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(item)) => Err(PollError::Sink {
                sink: self.name.clone(),
                item_id: item.id().to_string(),
                reason: "queue receiver closed".to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBroker;

    fn item(id: &str) -> Arc<PolledItem> {
        Arc::new(PolledItem::new(id, id, format!("https://x.test/{id}")))
    }

    #[tokio::test]
    async fn test_bus_sink_publishes_item_message() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut sub = broker.subscribe(Channel::News).await;
        let sink = BusSink::new(broker.clone(), Channel::News);

        sink.emit("wire", item("a")).await.unwrap();

        let message = sub.recv().await.unwrap();
        assert_eq!(message.source, "wire");
        assert_eq!(message.as_item().unwrap().id(), "a");
        assert_eq!(sink.name(), "bus[news]");
    }

    #[tokio::test]
    async fn test_queue_sink_drops_when_full() {
        let (sink, mut rx) = QueueSink::new("q", 2);
        for id in ["a", "b", "c"] {
            sink.emit("wire", item(id)).await.unwrap();
        }
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().id(), "a");
        assert_eq!(rx.recv().await.unwrap().id(), "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queue_sink_closed_receiver_is_error() {
        let (sink, rx) = QueueSink::new("q", 1);
        drop(rx);
        let err = sink.emit("wire", item("a")).await.unwrap_err();
        assert!(matches!(err, PollError::Sink { .. }));
    }
}
