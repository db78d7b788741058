use crate::error::SignalingError;
use crate::realtime::{BroadcastHandler, RealtimeBus, SubscriptionId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process [`RealtimeBus`] for tests and demos.
///
/// Both ends of a call can share one instance; publishes fan out to every
/// subscriber of the channel on its own task, so a handler that publishes
/// in response never re-enters the bus synchronously.
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, Vec<(SubscriptionId, Arc<dyn BroadcastHandler>)>>,
    next_id: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RealtimeBus for MemoryBus {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn BroadcastHandler>,
    ) -> Result<SubscriptionId, SignalingError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), SignalingError> {
        let handlers: Vec<Arc<dyn BroadcastHandler>> = match self.channels.get(channel) {
            Some(subs) => subs.iter().map(|(_, h)| h.clone()).collect(),
            None => return Ok(()),
        };
        for handler in handlers {
            let event = event.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                handler.on_broadcast(&event, payload).await;
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), SignalingError> {
        if let Some(mut subs) = self.channels.get_mut(channel) {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
        Ok(())
    }
}
