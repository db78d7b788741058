//! Broadcast transport for signaling.
//!
//! Models a realtime broadcast service: named channels carry (event, payload)
//! pairs to every subscriber of the channel, including the publisher itself.
//! The call core only ever uses one event label, but the trait stays generic
//! so a real backend can multiplex other traffic on the same channel.

pub mod memory;

pub use memory::MemoryBus;

use crate::error::SignalingError;
use async_trait::async_trait;
use std::sync::Arc;

/// Handle returned by [`RealtimeBus::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// Receives broadcasts for one subscription.
#[async_trait]
pub trait BroadcastHandler: Send + Sync {
    async fn on_broadcast(&self, event: &str, payload: serde_json::Value);
}

/// A connection to a broadcast backend.
///
/// Publishing to a channel delivers to all current subscribers of that
/// channel, the publisher's own subscriptions included. Delivery is
/// best-effort: unordered, at most once, unacknowledged. Consumers that
/// care about ordering must tolerate reordering themselves.
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn BroadcastHandler>,
    ) -> Result<SubscriptionId, SignalingError>;

    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), SignalingError>;

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), SignalingError>;
}
