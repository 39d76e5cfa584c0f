use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

use crate::bus::{Bus, BusError, Handler, SubscriptionId};
use crate::message::BusMessage;

struct Subscriber {
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// In-process pub/sub broker (spec.md §4.4). An external broker (NATS,
/// Redis pub/sub, etc.) is out of scope; this is the one router the system
/// ships with, and the one the coordinator and agent runtime talk to
/// in-process or via a thin RPC shim.
///
/// Each subscription gets its own unbounded channel and delivery task, so a
/// slow handler on one subscription never backpressures another, and
/// messages for a given subscription are handled strictly in arrival order.
pub struct InProcessBus {
    subjects: DashMap<String, Vec<(u64, Subscriber)>>,
    subject_by_id: DashMap<u64, String>,
    next_id: AtomicU64,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self { subjects: DashMap::new(), subject_by_id: DashMap::new(), next_id: AtomicU64::new(1) }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InProcessBus {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn publish(&self, message: BusMessage) {
        let Some(subscribers) = self.subjects.get(&message.subject) else {
            trace!("no subscribers for subject");
            return;
        };
        for (_, sub) in subscribers.iter() {
            if sub.sender.send(message.clone()).is_err() {
                debug!("subscriber channel closed, message dropped");
            }
        }
    }

    async fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<BusMessage>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });

        self.subjects.entry(subject.to_string()).or_default().push((id, Subscriber { sender: tx }));
        self.subject_by_id.insert(id, subject.to_string());
        SubscriptionId(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let Some((_, subject)) = self.subject_by_id.remove(&id.0) else {
            return Err(BusError::UnknownSubscription(id.0));
        };
        if let Some(mut subscribers) = self.subjects.get_mut(&subject) {
            subscribers.retain(|(sub_id, _)| *sub_id != id.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn delivers_to_subscriber_in_publish_order() {
        let bus = InProcessBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        bus.subscribe(
            "agent.a1.out",
            Box::new(move |msg| {
                received_clone.lock().unwrap().push(String::from_utf8(msg.payload).unwrap());
            }),
        )
        .await;

        for i in 0..10 {
            bus.publish(BusMessage::new("agent.a1.out", i.to_string().into_bytes())).await;
        }

        // give delivery tasks a chance to drain
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let got = received.lock().unwrap().clone();
        assert_eq!(got, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let bus = InProcessBus::new();
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();

        let id = bus
            .subscribe("agent.a1.in", Box::new(move |_| *count_clone.lock().unwrap() += 1))
            .await;

        bus.publish(BusMessage::new("agent.a1.in", vec![])).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.unsubscribe(id).await.unwrap();
        bus.publish(BusMessage::new("agent.a1.in", vec![])).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = InProcessBus::new();
        bus.publish(BusMessage::new("agent.ghost.in", vec![])).await;
    }
}
