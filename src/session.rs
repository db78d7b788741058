//! Call session orchestration.
//!
//! A [`CallSessionController`] owns everything one call needs and wires the
//! pieces together:
//!
//! # Architecture
//!
//! - **Media** comes from the injected [`MediaDevices`] backend and is
//!   attached to the peer connection before any negotiation.
//! - **Signaling** flows over a [`SignalingChannel`] derived from the two
//!   user ids; inbound envelopes are filtered by receiver and dispatched to
//!   the negotiation handlers.
//! - **Negotiation** lives in [`PeerConnectionManager`]; its events come
//!   back through a bridge that holds only a weak reference, so the session
//!   can drop freely.
//! - **History** is a best-effort insert when dialing and a close from
//!   whichever side hangs up first.
//!
//! Termination is guarded: no matter how the call ends, the channel, the
//! connection, the capture tracks and the open history row are all released
//! exactly once, and the owner hears about it through
//! [`CallEvents::on_call_ended`].

use crate::auth::AuthProvider;
use crate::config::RtcConfig;
use crate::error::CallError;
use crate::media::devices::{MediaConstraints, MediaDevices};
use crate::media::stream::{LocalStream, RemoteStream};
use crate::peer::{PeerConnectionManager, PeerConnectionObserver};
use crate::realtime::RealtimeBus;
use crate::signaling::{
    SignalingBody, SignalingChannel, SignalingHandler, SignalingMessage, call_channel_name,
};
use crate::store::CallLogStore;
use crate::types::{CallRole, CallType, ConnectionState, UserId};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// What the owner of a session hears about the call.
#[async_trait]
pub trait CallEvents: Send + Sync {
    /// Remote media is available for playback. Fired once per remote
    /// stream id.
    async fn on_remote_stream(&self, stream: Arc<RemoteStream>);

    async fn on_connection_state(&self, state: ConnectionState);

    /// The call is over and all resources are released. Fired exactly once,
    /// whether the call ended locally, failed to start, or broke down.
    async fn on_call_ended(&self);
}

/// The injected backends a session runs against.
#[derive(Clone)]
pub struct CallServices {
    pub auth: Arc<dyn AuthProvider>,
    pub call_logs: Arc<dyn CallLogStore>,
    pub bus: Arc<dyn RealtimeBus>,
    pub devices: Arc<dyn MediaDevices>,
    pub rtc: RtcConfig,
}

/// One end of one call, from dial to hang-up.
pub struct CallSessionController {
    local_user: UserId,
    peer_user: UserId,
    call_type: CallType,
    role: CallRole,
    manager: Arc<PeerConnectionManager>,
    channel: Arc<SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    call_logs: Arc<dyn CallLogStore>,
    events: Arc<dyn CallEvents>,
    local_stream: RwLock<LocalStream>,
    remote_stream: RwLock<Option<Arc<RemoteStream>>>,
    muted: AtomicBool,
    camera_off: AtomicBool,
    speaker_on: AtomicBool,
    ended: AtomicBool,
}

/// Routes inbound signaling envelopes into the session.
struct SessionDispatch {
    session: Weak<CallSessionController>,
}

#[async_trait]
impl SignalingHandler for SessionDispatch {
    async fn on_message(&self, message: SignalingMessage) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        session.handle_signaling(message).await;
    }
}

/// Forwards peer connection events into the session.
struct PeerBridge {
    session: Weak<CallSessionController>,
}

#[async_trait]
impl PeerConnectionObserver for PeerBridge {
    async fn on_remote_stream(&self, stream: Arc<RemoteStream>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        stream.set_volume(if session.is_speaker_on() { 1.0 } else { 0.0 });
        if let Ok(mut slot) = session.remote_stream.write() {
            *slot = Some(stream.clone());
        }
        session.events.on_remote_stream(stream).await;
    }

    async fn on_connection_state_change(&self, state: ConnectionState) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        session.events.on_connection_state(state).await;
    }

    async fn on_ice_candidate(&self, candidate: RTCIceCandidateInit) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let message = SignalingMessage {
            body: SignalingBody::IceCandidate(candidate),
            sender: session.local_user.clone(),
            receiver: session.peer_user.clone(),
        };
        session.channel.send(&message).await;
    }
}

impl CallSessionController {
    /// Starts one end of a call and returns the live session.
    ///
    /// The caller role captures media, records the call in history and sends
    /// the opening offer; the callee role captures media and waits for that
    /// offer to arrive on the shared channel. On any setup failure everything
    /// already acquired is released and [`CallEvents::on_call_ended`] fires
    /// before the error is returned.
    pub async fn start(
        services: CallServices,
        peer_user: impl Into<UserId>,
        call_type: CallType,
        role: CallRole,
        events: Arc<dyn CallEvents>,
    ) -> Result<Arc<Self>, CallError> {
        let peer_user = peer_user.into();

        let local_user = match services.auth.current_user_id().await {
            Ok(id) => id,
            Err(e) => {
                events.on_call_ended().await;
                return Err(e.into());
            }
        };
        info!(
            "Starting {} call with {} as {}",
            call_type,
            peer_user,
            if role.is_caller() { "caller" } else { "callee" }
        );

        let constraints = MediaConstraints::for_call_type(call_type);
        let local_stream = match services.devices.acquire(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to acquire local media: {e}");
                events.on_call_ended().await;
                return Err(e.into());
            }
        };

        let manager = match PeerConnectionManager::new(&services.rtc).await {
            Ok(manager) => manager,
            Err(e) => {
                local_stream.stop_all();
                events.on_call_ended().await;
                return Err(e.into());
            }
        };

        let channel = Arc::new(SignalingChannel::new(
            services.bus.clone(),
            call_channel_name(&local_user, &peer_user),
        ));

        let session = Arc::new(Self {
            local_user: local_user.clone(),
            peer_user: peer_user.clone(),
            call_type,
            role,
            manager,
            channel,
            devices: services.devices.clone(),
            call_logs: services.call_logs.clone(),
            events,
            local_stream: RwLock::new(local_stream.clone()),
            remote_stream: RwLock::new(None),
            muted: AtomicBool::new(false),
            camera_off: AtomicBool::new(false),
            speaker_on: AtomicBool::new(true),
            ended: AtomicBool::new(false),
        });

        // From here on, any failure must release what the session holds.
        let cleanup = scopeguard::guard(session.clone(), |session| {
            tokio::spawn(async move {
                session.teardown().await;
            });
        });

        session.manager.set_observer(Arc::new(PeerBridge {
            session: Arc::downgrade(&session),
        }));
        session.manager.set_local_stream(&local_stream).await?;
        session
            .channel
            .open(Arc::new(SessionDispatch {
                session: Arc::downgrade(&session),
            }))
            .await?;

        if role.is_caller() {
            if let Err(e) = services
                .call_logs
                .insert_call_start(&local_user, &peer_user, call_type)
                .await
            {
                warn!("Failed to record call start: {e}");
            }

            let offer = session.manager.create_offer().await?;
            session
                .channel
                .send(&SignalingMessage {
                    body: SignalingBody::Offer(offer),
                    sender: local_user,
                    receiver: peer_user,
                })
                .await;
        }

        Ok(scopeguard::ScopeGuard::into_inner(cleanup))
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn peer_user(&self) -> &str {
        &self.peer_user
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.connection_state()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_camera_off(&self) -> bool {
        self.camera_off.load(Ordering::SeqCst)
    }

    pub fn is_speaker_on(&self) -> bool {
        self.speaker_on.load(Ordering::SeqCst)
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Snapshot of the current local tracks.
    pub fn local_stream(&self) -> LocalStream {
        self.local_stream.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// The most recent remote stream, once one has arrived.
    pub fn remote_stream(&self) -> Option<Arc<RemoteStream>> {
        self.remote_stream.read().ok().and_then(|s| s.clone())
    }

    /// Flips the microphone. Returns `true` when now muted.
    pub fn toggle_mute(&self) -> bool {
        if self.has_ended() {
            return self.is_muted();
        }
        let muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        let snapshot = self.local_stream();
        for track in snapshot.audio_tracks() {
            track.set_enabled(!muted);
        }
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        muted
    }

    /// Flips the camera on a video call. Returns `true` when the camera is
    /// now off; on a voice call this is a no-op.
    pub fn toggle_camera(&self) -> bool {
        if !self.call_type.has_video() {
            debug!("Ignoring camera toggle on a voice call");
            return false;
        }
        if self.has_ended() {
            return self.is_camera_off();
        }
        let camera_off = !self.camera_off.fetch_xor(true, Ordering::SeqCst);
        let snapshot = self.local_stream();
        for track in snapshot.video_tracks() {
            track.set_enabled(!camera_off);
        }
        info!("Camera {}", if camera_off { "off" } else { "on" });
        camera_off
    }

    /// Flips remote playback between full volume and silent. Returns `true`
    /// when the speaker is now on.
    pub fn toggle_speaker(&self) -> bool {
        if self.has_ended() {
            return self.is_speaker_on();
        }
        let speaker_on = !self.speaker_on.fetch_xor(true, Ordering::SeqCst);
        if let Some(stream) = self.remote_stream() {
            stream.set_volume(if speaker_on { 1.0 } else { 0.0 });
        }
        info!("Speaker {}", if speaker_on { "on" } else { "off" });
        speaker_on
    }

    /// Switches to the other camera, keeping the call and the camera-off
    /// state intact. A voice call, a missing video track or a single-camera
    /// device makes this a no-op, and a failure to open the new camera is
    /// logged and leaves the current one running.
    pub async fn switch_camera(&self) {
        if self.has_ended() {
            return;
        }
        let snapshot = self.local_stream();
        let Some(current) = snapshot.video_tracks().next() else {
            debug!("No video track to switch");
            return;
        };

        let inputs = match self.devices.list_video_inputs().await {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!("Camera switch skipped, device listing failed: {e}");
                return;
            }
        };
        if inputs.len() < 2 {
            debug!("No alternate camera available");
            return;
        }
        let Some(next) = inputs.iter().find(|c| c.device_id != current.device_id()) else {
            return;
        };
        info!("Switching camera to {}", next.label);

        let new_track = match self.devices.acquire_video_input(&next.device_id).await {
            Ok(track) => track,
            Err(e) => {
                warn!("Camera switch skipped, could not open {}: {e}", next.label);
                return;
            }
        };
        new_track.set_enabled(!self.is_camera_off());

        let old = match self.local_stream.write() {
            Ok(mut stream) => stream.replace_video_track(new_track),
            Err(_) => None,
        };
        if let Some(old) = old {
            old.stop();
        }

        let snapshot = self.local_stream();
        if let Err(e) = self.manager.set_local_stream(&snapshot).await {
            warn!("Could not attach the switched camera track: {e}");
        }
    }

    /// Hangs up. Safe to call more than once.
    pub async fn end_call(&self) {
        self.teardown().await;
    }

    async fn handle_signaling(&self, message: SignalingMessage) {
        if !message.is_for(&self.local_user) {
            debug!(
                "Ignoring {} addressed to {}",
                message.body.kind(),
                message.receiver
            );
            return;
        }
        if self.has_ended() {
            return;
        }
        match message.body {
            SignalingBody::Offer(offer) => {
                debug!("Received offer from {}", message.sender);
                match self.manager.handle_offer(offer).await {
                    Ok(answer) => {
                        self.channel
                            .send(&SignalingMessage {
                                body: SignalingBody::Answer(answer),
                                sender: self.local_user.clone(),
                                receiver: message.sender,
                            })
                            .await;
                    }
                    Err(e) => {
                        warn!("Failed to handle offer: {e}");
                        self.teardown().await;
                    }
                }
            }
            SignalingBody::Answer(answer) => {
                debug!("Received answer from {}", message.sender);
                if let Err(e) = self.manager.handle_answer(answer).await {
                    warn!("Failed to apply answer: {e}");
                    self.teardown().await;
                }
            }
            SignalingBody::IceCandidate(candidate) => {
                if let Err(e) = self.manager.handle_ice_candidate(candidate).await {
                    warn!("Failed to add remote ICE candidate: {e}");
                    self.teardown().await;
                }
            }
        }
    }

    async fn teardown(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Ending {} call with {}", self.call_type, self.peer_user);
        let snapshot = self.local_stream();
        Self::run_teardown(
            self.channel.clone(),
            self.manager.clone(),
            snapshot,
            self.call_logs.clone(),
            self.local_user.clone(),
            self.peer_user.clone(),
            Some(self.events.clone()),
        )
        .await;
    }

    async fn run_teardown(
        channel: Arc<SignalingChannel>,
        manager: Arc<PeerConnectionManager>,
        stream: LocalStream,
        call_logs: Arc<dyn CallLogStore>,
        local_user: UserId,
        peer_user: UserId,
        events: Option<Arc<dyn CallEvents>>,
    ) {
        channel.close().await;
        manager.close().await;
        stream.stop_all();
        Self::close_call_log(call_logs.as_ref(), &local_user, &peer_user).await;
        if let Some(events) = events {
            events.on_call_ended().await;
        }
    }

    /// Closes the open history row for this call, whichever side opened it.
    /// Losing the race to the other side just means finding nothing.
    async fn close_call_log(call_logs: &dyn CallLogStore, local_user: &str, peer_user: &str) {
        let entry = match call_logs.find_open_call(local_user, peer_user).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => match call_logs.find_open_call(peer_user, local_user).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to look up open call entry: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Failed to look up open call entry: {e}");
                None
            }
        };
        let Some(entry) = entry else {
            debug!("No open call entry between {local_user} and {peer_user}");
            return;
        };
        if let Err(e) = call_logs.close_call(entry.id, Utc::now()).await {
            warn!("Failed to close call entry {}: {e}", entry.id);
        }
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Call session dropped without end_call; cleaning up");
        let snapshot = self.local_stream.read().map(|s| s.clone()).unwrap_or_default();
        snapshot.stop_all();
        let channel = self.channel.clone();
        let manager = self.manager.clone();
        let call_logs = self.call_logs.clone();
        let local_user = self.local_user.clone();
        let peer_user = self.peer_user.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                Self::run_teardown(
                    channel,
                    manager,
                    LocalStream::default(),
                    call_logs,
                    local_user,
                    peer_user,
                    None,
                )
                .await;
            });
        }
    }
}
