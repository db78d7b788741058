//! Peer connection lifecycle and negotiation.
//!
//! Wraps one [`RTCPeerConnection`] behind the operations the call session
//! needs: offer and answer exchange, trickled ICE candidates, local track
//! attachment and remote track grouping. ICE candidates that arrive before
//! the remote description are queued and applied once it lands, since the
//! underlying connection rejects them until then.

use crate::config::RtcConfig;
use crate::media::stream::{LocalStream, LocalTrack, RemoteStream};
use crate::types::ConnectionState;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

/// Callbacks out of the peer connection, delivered on its event tasks.
#[async_trait]
pub trait PeerConnectionObserver: Send + Sync {
    /// Fired once per remote stream id, on its first track.
    async fn on_remote_stream(&self, stream: Arc<RemoteStream>);

    async fn on_connection_state_change(&self, state: ConnectionState);

    /// A local candidate to trickle to the peer.
    async fn on_ice_candidate(&self, candidate: RTCIceCandidateInit);
}

/// Candidates received before the remote description, plus the flag that
/// tells future candidates to skip the queue. One lock covers both so a
/// candidate can never slip past a concurrent drain.
#[derive(Default)]
struct PendingCandidates {
    remote_set: bool,
    queue: Vec<RTCIceCandidateInit>,
}

/// One outbound track and the sender carrying it.
struct SenderSlot {
    track: Arc<LocalTrack>,
    sender: Arc<RTCRtpSender>,
}

pub struct PeerConnectionManager {
    pc: Arc<RTCPeerConnection>,
    observer: Arc<RwLock<Option<Arc<dyn PeerConnectionObserver>>>>,
    state: Arc<RwLock<ConnectionState>>,
    pending: Mutex<PendingCandidates>,
    remote_streams: Arc<Mutex<HashMap<String, Arc<RemoteStream>>>>,
    senders: Mutex<HashMap<String, SenderSlot>>,
    closed: AtomicBool,
}

impl PeerConnectionManager {
    pub async fn new(config: &RtcConfig) -> Result<Arc<Self>, webrtc::Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let mut setting_engine = SettingEngine::default();
        if config.include_loopback {
            setting_engine.set_include_loopback_candidate(true);
        }
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(config.to_rtc_configuration())
                .await?,
        );

        let manager = Arc::new(Self {
            pc,
            observer: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::New)),
            pending: Mutex::new(PendingCandidates::default()),
            remote_streams: Arc::new(Mutex::new(HashMap::new())),
            senders: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        manager.register_handlers();
        Ok(manager)
    }

    /// Install the event sink. Do this before any negotiation call; events
    /// that fire without an observer are dropped.
    pub fn set_observer(&self, observer: Arc<dyn PeerConnectionObserver>) {
        if let Ok(mut slot) = self.observer.write() {
            *slot = Some(observer);
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().map(|s| *s).unwrap_or(ConnectionState::New)
    }

    fn register_handlers(&self) {
        let observer = self.observer.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let observer = observer.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!("Failed to serialize local ICE candidate: {e}");
                            return;
                        }
                    };
                    if let Some(observer) = observer.read().ok().and_then(|o| o.clone()) {
                        observer.on_ice_candidate(init).await;
                    }
                })
            }));

        let observer = self.observer.clone();
        let state_slot = self.state.clone();
        self.pc.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let observer = observer.clone();
                let state_slot = state_slot.clone();
                Box::pin(async move {
                    let state = ConnectionState::from(state);
                    info!("Peer connection state: {state}");
                    if let Ok(mut slot) = state_slot.write() {
                        *slot = state;
                    }
                    if let Some(observer) = observer.read().ok().and_then(|o| o.clone()) {
                        observer.on_connection_state_change(state).await;
                    }
                })
            },
        ));

        let observer = self.observer.clone();
        let remote_streams = self.remote_streams.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let observer = observer.clone();
                let remote_streams = remote_streams.clone();
                Box::pin(async move {
                    let stream_id = track.stream_id();
                    debug!("Remote {} track for stream {stream_id}", track.kind());
                    let new_stream = {
                        let mut streams = remote_streams.lock().await;
                        match streams.get(&stream_id) {
                            Some(stream) => {
                                stream.add_track(track);
                                None
                            }
                            None => {
                                let stream = Arc::new(RemoteStream::new(stream_id.clone()));
                                stream.add_track(track);
                                streams.insert(stream_id, stream.clone());
                                Some(stream)
                            }
                        }
                    };
                    if let Some(stream) = new_stream {
                        if let Some(observer) = observer.read().ok().and_then(|o| o.clone()) {
                            observer.on_remote_stream(stream).await;
                        }
                    }
                })
            },
        ));
    }

    /// Attaches the stream's tracks as outbound senders. A track already
    /// attached under the same id is left alone; a new track of a kind that
    /// already has a sender replaces that sender, so a call never carries
    /// two outbound tracks of one kind.
    pub async fn set_local_stream(&self, stream: &LocalStream) -> Result<(), webrtc::Error> {
        let mut senders = self.senders.lock().await;
        for track in stream.tracks() {
            let track_id = track.id().to_string();
            if senders.contains_key(&track_id) {
                continue;
            }
            let same_kind = senders
                .iter()
                .find(|(_, slot)| slot.track.kind() == track.kind())
                .map(|(id, _)| id.clone());
            if let Some(old_id) = same_kind {
                if let Some(old) = senders.remove(&old_id) {
                    debug!("Replacing outbound {} sender", track.kind().as_str());
                    self.pc.remove_track(&old.sender).await?;
                }
            }

            let sender = self.pc.add_track(track.rtc_track()).await?;
            let rtcp_sender = sender.clone();
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = rtcp_sender.read(&mut rtcp_buf).await {}
            });
            senders.insert(
                track_id,
                SenderSlot {
                    track: track.clone(),
                    sender,
                },
            );
        }
        Ok(())
    }

    /// Builds the local offer and applies it as the local description.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription, webrtc::Error> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Applies a remote offer and returns the answer, already set as the
    /// local description.
    pub async fn handle_offer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, webrtc::Error> {
        self.pc.set_remote_description(offer).await?;
        self.drain_pending_candidates().await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    pub async fn handle_answer(&self, answer: RTCSessionDescription) -> Result<(), webrtc::Error> {
        self.pc.set_remote_description(answer).await?;
        self.drain_pending_candidates().await?;
        Ok(())
    }

    /// Applies a remote candidate, or queues it while the remote description
    /// is still outstanding.
    pub async fn handle_ice_candidate(
        &self,
        candidate: RTCIceCandidateInit,
    ) -> Result<(), webrtc::Error> {
        {
            let mut pending = self.pending.lock().await;
            if !pending.remote_set {
                debug!("Queueing remote ICE candidate until remote description is set");
                pending.queue.push(candidate);
                return Ok(());
            }
        }
        self.pc.add_ice_candidate(candidate).await
    }

    /// Applies everything queued before the remote description landed. A
    /// rejected candidate fails the whole negotiation step, like a rejected
    /// description would.
    async fn drain_pending_candidates(&self) -> Result<(), webrtc::Error> {
        let queued = {
            let mut pending = self.pending.lock().await;
            pending.remote_set = true;
            std::mem::take(&mut pending.queue)
        };
        if queued.is_empty() {
            return Ok(());
        }
        debug!("Applying {} queued ICE candidate(s)", queued.len());
        for candidate in queued {
            self.pc.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Closes the underlying connection and stops every track lent to it.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!("Error closing peer connection: {e}");
        }
        for slot in self.senders.lock().await.values() {
            slot.track.stop();
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_candidate_count(&self) -> usize {
        self.pending.lock().await.queue.len()
    }

    #[cfg(test)]
    pub(crate) async fn sender_count(&self) -> usize {
        self.senders.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::devices::{MediaConstraints, MediaDevices, StaticDevices};
    use crate::types::CallType;

    fn offline_config() -> RtcConfig {
        RtcConfig::without_ice_servers()
    }

    async fn manager_with_audio() -> (Arc<PeerConnectionManager>, LocalStream) {
        let manager = PeerConnectionManager::new(&offline_config()).await.unwrap();
        let stream = StaticDevices::new()
            .acquire(&MediaConstraints::for_call_type(CallType::Voice))
            .await
            .unwrap();
        manager.set_local_stream(&stream).await.unwrap();
        (manager, stream)
    }

    fn host_candidate() -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn new_manager_starts_in_new_state() {
        let manager = PeerConnectionManager::new(&offline_config()).await.unwrap();
        assert_eq!(manager.connection_state(), ConnectionState::New);
        manager.close().await;
    }

    #[tokio::test]
    async fn offer_and_answer_exchange_succeeds() {
        let (caller, _caller_stream) = manager_with_audio().await;
        let (callee, _callee_stream) = manager_with_audio().await;

        let offer = caller.create_offer().await.unwrap();
        assert!(offer.sdp.contains("m=audio"));

        let answer = callee.handle_offer(offer).await.unwrap();
        caller.handle_answer(answer).await.unwrap();

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn early_candidates_queue_until_remote_description() {
        let (caller, _caller_stream) = manager_with_audio().await;
        let (callee, _callee_stream) = manager_with_audio().await;

        callee.handle_ice_candidate(host_candidate()).await.unwrap();
        callee.handle_ice_candidate(host_candidate()).await.unwrap();
        assert_eq!(callee.pending_candidate_count().await, 2);

        let offer = caller.create_offer().await.unwrap();
        callee.handle_offer(offer).await.unwrap();
        assert_eq!(callee.pending_candidate_count().await, 0);

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn queued_garbage_candidate_fails_the_negotiation_step() {
        let (caller, _caller_stream) = manager_with_audio().await;
        let (callee, _callee_stream) = manager_with_audio().await;

        callee
            .handle_ice_candidate(RTCIceCandidateInit {
                candidate: "garbage".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            })
            .await
            .unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert!(callee.handle_offer(offer).await.is_err());

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn candidate_after_remote_description_applies_directly() {
        let (caller, _caller_stream) = manager_with_audio().await;
        let (callee, _callee_stream) = manager_with_audio().await;

        let offer = caller.create_offer().await.unwrap();
        callee.handle_offer(offer).await.unwrap();

        callee.handle_ice_candidate(host_candidate()).await.unwrap();
        assert_eq!(callee.pending_candidate_count().await, 0);

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn same_kind_track_replaces_existing_sender() {
        let manager = PeerConnectionManager::new(&offline_config()).await.unwrap();
        let devices = StaticDevices::new();
        let mut stream = devices
            .acquire(&MediaConstraints::for_call_type(CallType::Video))
            .await
            .unwrap();
        manager.set_local_stream(&stream).await.unwrap();
        assert_eq!(manager.sender_count().await, 2);

        let replacement = devices.acquire_video_input("camera-0").await.unwrap();
        stream.replace_video_track(replacement);
        manager.set_local_stream(&stream).await.unwrap();
        assert_eq!(manager.sender_count().await, 2);

        manager.close().await;
    }

    #[tokio::test]
    async fn close_stops_lent_tracks() {
        let (manager, stream) = manager_with_audio().await;
        let track = stream.tracks()[0].clone();
        assert!(!track.is_stopped());
        manager.close().await;
        assert!(track.is_stopped());
    }

    #[tokio::test]
    async fn close_twice_is_harmless() {
        let manager = PeerConnectionManager::new(&offline_config()).await.unwrap();
        manager.close().await;
        manager.close().await;
    }
}
