//! Signaling between the two ends of a call.
//!
//! Both peers derive the same channel name from the pair of user ids and
//! exchange offer, answer and ICE candidate envelopes over it. The broadcast
//! transport echoes a peer's own messages back to it, so every inbound
//! envelope is checked against the local user id before it is handled.

use crate::error::SignalingError;
use crate::realtime::{BroadcastHandler, RealtimeBus, SubscriptionId};
use crate::types::UserId;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Event label all call signaling is published under.
pub const SIGNALING_EVENT: &str = "signaling";

/// Channel name for a call between two users. Order independent, so both
/// sides subscribe to the same channel without coordinating.
pub fn call_channel_name(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort_unstable();
    format!("call-{}-{}", pair[0], pair[1])
}

/// The negotiation content of a signaling envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalingBody {
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    IceCandidate(RTCIceCandidateInit),
}

impl SignalingBody {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingBody::Offer(_) => "offer",
            SignalingBody::Answer(_) => "answer",
            SignalingBody::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// One signaling envelope as it travels over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(flatten)]
    pub body: SignalingBody,
    pub sender: UserId,
    pub receiver: UserId,
}

impl SignalingMessage {
    pub fn is_for(&self, user_id: &str) -> bool {
        self.receiver == user_id
    }
}

/// Receives the envelopes arriving on a [`SignalingChannel`].
#[async_trait]
pub trait SignalingHandler: Send + Sync {
    async fn on_message(&self, message: SignalingMessage);
}

/// One call's signaling channel over a [`RealtimeBus`].
pub struct SignalingChannel {
    name: String,
    bus: Arc<dyn RealtimeBus>,
    subscription: Mutex<Option<SubscriptionId>>,
    closed: AtomicBool,
}

/// Adapts bus broadcasts into decoded [`SignalingMessage`]s.
struct Inbound {
    handler: Arc<dyn SignalingHandler>,
}

#[async_trait]
impl BroadcastHandler for Inbound {
    async fn on_broadcast(&self, event: &str, payload: serde_json::Value) {
        if event != SIGNALING_EVENT {
            return;
        }
        match serde_json::from_value::<SignalingMessage>(payload) {
            Ok(message) => self.handler.on_message(message).await,
            Err(e) => warn!("Dropping malformed signaling payload: {e}"),
        }
    }
}

impl SignalingChannel {
    pub fn new(bus: Arc<dyn RealtimeBus>, name: String) -> Self {
        Self {
            name,
            bus,
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes `handler` to the channel. Call once per channel.
    pub async fn open(&self, handler: Arc<dyn SignalingHandler>) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        let id = self
            .bus
            .subscribe(&self.name, Arc::new(Inbound { handler }))
            .await?;
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(id);
        }
        Ok(())
    }

    /// Publishes an envelope. Failures are logged, not propagated; signaling
    /// sends are best effort and the connection state reports the outcome.
    pub async fn send(&self, message: &SignalingMessage) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Ignoring {} send on closed channel", message.body.kind());
            return;
        }
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {} envelope: {e}", message.body.kind());
                return;
            }
        };
        if let Err(e) = self.bus.publish(&self.name, SIGNALING_EVENT, payload).await {
            warn!(
                "Failed to publish {} on {}: {e}",
                message.body.kind(),
                self.name
            );
        }
    }

    /// Unsubscribes and marks the channel closed. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self.subscription.lock().ok().and_then(|mut slot| slot.take());
        if let Some(id) = id {
            if let Err(e) = self.bus.unsubscribe(&self.name, id).await {
                warn!("Failed to unsubscribe from {}: {e}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::MemoryBus;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};

    const TEST_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    fn offer_message(sender: &str, receiver: &str) -> SignalingMessage {
        let description: RTCSessionDescription =
            serde_json::from_value(json!({"type": "offer", "sdp": TEST_SDP}))
                .expect("valid description");
        SignalingMessage {
            body: SignalingBody::Offer(description),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
        }
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<SignalingMessage>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SignalingMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl SignalingHandler for Recorder {
        async fn on_message(&self, message: SignalingMessage) {
            let _ = self.tx.send(message);
        }
    }

    #[test]
    fn channel_name_ignores_argument_order() {
        assert_eq!(call_channel_name("alice", "bob"), "call-alice-bob");
        assert_eq!(call_channel_name("bob", "alice"), "call-alice-bob");
    }

    #[test]
    fn envelope_wire_shape_is_flat() {
        let encoded = serde_json::to_value(offer_message("alice", "bob")).unwrap();
        assert_eq!(encoded["type"], "offer");
        assert_eq!(encoded["sender"], "alice");
        assert_eq!(encoded["receiver"], "bob");
        assert!(encoded["payload"]["sdp"].is_string());
    }

    #[test]
    fn ice_candidate_envelope_round_trips() {
        let message = SignalingMessage {
            body: SignalingBody::IceCandidate(RTCIceCandidateInit {
                candidate: "candidate:1 1 udp 2130706431 127.0.0.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }),
            sender: "alice".to_string(),
            receiver: "bob".to_string(),
        };
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["type"], "ice-candidate");
        assert_eq!(encoded["payload"]["sdpMid"], "0");

        let decoded: SignalingMessage = serde_json::from_value(encoded).unwrap();
        assert!(matches!(decoded.body, SignalingBody::IceCandidate(_)));
    }

    #[test]
    fn is_for_matches_receiver_only() {
        let message = offer_message("alice", "bob");
        assert!(message.is_for("bob"));
        assert!(!message.is_for("alice"));
        assert!(!message.is_for("carol"));
    }

    #[tokio::test]
    async fn open_channel_delivers_decoded_envelopes() {
        let bus = Arc::new(MemoryBus::new());
        let channel = SignalingChannel::new(bus.clone(), call_channel_name("alice", "bob"));
        let (recorder, mut rx) = Recorder::new();
        channel.open(recorder).await.unwrap();

        channel.send(&offer_message("alice", "bob")).await;

        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel dropped");
        assert_eq!(received.sender, "alice");
        assert!(matches!(received.body, SignalingBody::Offer(_)));
    }

    #[tokio::test]
    async fn malformed_and_foreign_broadcasts_are_dropped() {
        let bus = Arc::new(MemoryBus::new());
        let channel = SignalingChannel::new(bus.clone(), "call-a-b".to_string());
        let (recorder, mut rx) = Recorder::new();
        channel.open(recorder).await.unwrap();

        bus.publish("call-a-b", SIGNALING_EVENT, json!({"type": "garbage"}))
            .await
            .unwrap();
        bus.publish("call-a-b", "presence", json!({"type": "offer"}))
            .await
            .unwrap();

        assert!(
            timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_delivery() {
        let bus = Arc::new(MemoryBus::new());
        let channel = SignalingChannel::new(bus.clone(), "call-a-b".to_string());
        let (recorder, mut rx) = Recorder::new();
        // Clone keeps the recorder's sender alive after close drops the bus's
        // Arc, so the silence check below times out instead of seeing a close.
        channel.open(recorder.clone()).await.unwrap();

        channel.close().await;
        channel.close().await;
        channel.send(&offer_message("alice", "bob")).await;
        bus.publish(
            "call-a-b",
            SIGNALING_EVENT,
            serde_json::to_value(offer_message("alice", "bob")).unwrap(),
        )
        .await
        .unwrap();

        assert!(
            timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }
}
