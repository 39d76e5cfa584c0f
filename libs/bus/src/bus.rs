use async_trait::async_trait;
use thiserror::Error;

use crate::message::BusMessage;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no such subscription: {0}")]
    UnknownSubscription(u64),
    #[error("bus is shutting down")]
    Closed,
}

/// A callback invoked for every message published to a subscribed subject.
/// Must not block: it runs on the subscription's dedicated delivery task.
pub type Handler = Box<dyn Fn(BusMessage) + Send + Sync>;

/// An opaque token identifying one `subscribe` call, for later `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The pub/sub surface (spec.md §4.4, C4): exact-subject publish/subscribe
/// with per-subscription FIFO delivery.
///
/// Implementations guarantee that messages delivered to a single
/// subscription are handled strictly in publish order, one at a time —
/// callers never see two invocations of the same subscription's handler
/// running concurrently. Ordering across *different* subscriptions, or
/// across different subjects, is not guaranteed.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, message: BusMessage);

    async fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionId;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}
