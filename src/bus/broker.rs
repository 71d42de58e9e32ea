//! Publish/subscribe broker.
//!
//! Every subscriber owns a FIFO queue; `publish` pushes one shared
//! `Arc<Message>` into each queue of the channel. Publishing to a channel
//! without subscribers drops the message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Channel, Message};

/// Identifies one subscription for [`MessageBroker::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    receiver: mpsc::UnboundedReceiver<Arc<Message>>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Waits for the next message. `None` once the subscription was removed
    /// from the broker and its queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.recv().await
    }

    /// Returns the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.try_recv().ok()
    }
}

/// Broker contract used by the router and bus sinks.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Delivers `message` to every current subscriber of `channel`.
    /// Returns the number of subscribers reached.
    async fn publish(&self, channel: Channel, message: Arc<Message>) -> usize;

    /// Opens a new subscription on `channel`.
    async fn subscribe(&self, channel: Channel) -> Subscription;

    /// Removes a subscription. Unknown subscriptions are ignored.
    fn unsubscribe(&self, channel: Channel, subscription: &Subscription);
}

type Subscriber = (SubscriptionId, mpsc::UnboundedSender<Arc<Message>>);

/// In-process broker.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    channels: DashMap<Channel, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map_or(0, |subs| {
            subs.iter().filter(|(_, tx)| !tx.is_closed()).count()
        })
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, channel: Channel, message: Arc<Message>) -> usize {
        let Some(mut subscribers) = self.channels.get_mut(&channel) else {
            trace!(%channel, "no subscribers, message dropped");
            return 0;
        };

        // A send only fails when the receiver is gone; forget those.
        subscribers.retain(|(_, tx)| tx.send(Arc::clone(&message)).is_ok());
        let delivered = subscribers.len();
        trace!(%channel, delivered, "published message");
        delivered
    }

    async fn subscribe(&self, channel: Channel) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.channels.entry(channel).or_default().push((id, tx));
        debug!(%channel, id = id.0, "subscribed");
        Subscription {
            id,
            channel,
            receiver,
        }
    }

    fn unsubscribe(&self, channel: Channel, subscription: &Subscription) {
        if let Some(mut subscribers) = self.channels.get_mut(&channel) {
            subscribers.retain(|(id, _)| *id != subscription.id);
            debug!(%channel, id = subscription.id.0, "unsubscribed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(n: i64) -> Arc<Message> {
        Arc::new(Message::event("test", "tick", json!(n)))
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_drops() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.publish(Channel::News, event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_shares_one_message() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe(Channel::News).await;
        let mut b = broker.subscribe(Channel::News).await;

        let message = event(1);
        assert_eq!(broker.publish(Channel::News, Arc::clone(&message)).await, 2);

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&got_a, &message));
        assert!(Arc::ptr_eq(&got_b, &message));
    }

    #[tokio::test]
    async fn test_per_subscriber_fifo() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe(Channel::Filing).await;
        for n in 0..5 {
            broker.publish(Channel::Filing, event(n)).await;
        }
        for n in 0..5 {
            let message = sub.recv().await.unwrap();
            assert_eq!(message.payload, crate::bus::Payload::Event {
                kind: "tick".to_string(),
                data: json!(n),
            });
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe(Channel::Calendar).await;
        broker.unsubscribe(Channel::Calendar, &sub);

        assert_eq!(broker.publish(Channel::Calendar, event(1)).await, 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broker = InMemoryBroker::new();
        let sub = broker.subscribe(Channel::Earnings).await;
        let _keep = broker.subscribe(Channel::Earnings).await;
        drop(sub);

        assert_eq!(broker.publish(Channel::Earnings, event(1)).await, 1);
        assert_eq!(broker.subscriber_count(Channel::Earnings), 1);
    }
}
