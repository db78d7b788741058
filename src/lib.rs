//! Peer-to-peer voice and video calling core.
//!
//! One [`CallSessionController`] per call wires local capture, a shared
//! signaling channel and a WebRTC peer connection together, keeps the call
//! history store up to date, and reports progress through [`CallEvents`].
//! Every platform-facing concern is an injected trait: identity behind
//! [`auth::AuthProvider`], capture behind [`media::MediaDevices`], transport
//! behind [`realtime::RealtimeBus`] and history behind
//! [`store::CallLogStore`], with in-memory implementations of each for tests
//! and demos.

pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod realtime;
pub mod session;
pub mod signaling;
pub mod store;
pub mod types;

pub use auth::{AuthProvider, StaticAuth};
pub use config::{DEFAULT_STUN_SERVERS, RtcConfig};
pub use error::{AuthError, CallError, MediaError, SignalingError};
pub use media::{
    LocalStream, LocalTrack, MediaConstraints, MediaDevices, RemoteStream, StaticDevices,
    TrackKind, VideoInputInfo,
};
pub use peer::{PeerConnectionManager, PeerConnectionObserver};
pub use realtime::{BroadcastHandler, MemoryBus, RealtimeBus, SubscriptionId};
pub use session::{CallEvents, CallServices, CallSessionController};
pub use signaling::{
    SIGNALING_EVENT, SignalingBody, SignalingChannel, SignalingHandler, SignalingMessage,
    call_channel_name,
};
pub use store::{CallLogEntry, CallLogStore, MemoryCallLogStore, StoreError};
pub use types::{CallRole, CallType, ConnectionState, UserId};
